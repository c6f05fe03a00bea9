//! # Cobot Driver
//!
//! 机械臂控制器的实时驱动层：
//! - 控制循环（每个状态报文唤醒一次，最多发送一帧命令）
//! - 状态同步（ArcSwap 无锁读取最新快照）
//! - 命令目标插槽（后写覆盖，控制循环 try_lock 读取）
//! - 观察者注册表与数字 I/O 视图
//!
//! # 快速开始
//!
//! ```no_run
//! use cobot_driver::{DriverConfig, RobotDriver};
//!
//! let driver = RobotDriver::new();
//! driver.setup(DriverConfig {
//!     host_address: "192.168.1.10".into(),
//!     ..Default::default()
//! })?;
//! driver.start()?;
//!
//! let state = driver.wait_for_state(std::time::Duration::from_secs(1))?;
//! driver.move_joints(&state.q_actual)?;
//!
//! driver.stop();
//! # Ok::<(), cobot_driver::DriverError>(())
//! ```

pub mod command;
pub mod config;
pub mod digital_io;
mod driver;
mod error;
pub mod metrics;
pub mod mode;
pub mod observer;
pub mod pipeline;
pub mod slot;
pub mod state;
pub mod watchdog;

pub use command::{CommandTarget, FrameKind, Motion, PlannedFrame};
pub use config::{DriverConfig, ServoParams};
pub use digital_io::{DigitalIo, IoDevice};
pub use driver::RobotDriver;
pub use error::{ConfigError, DigitalIoError, DriverError};
pub use metrics::{DriverMetrics, MetricsSnapshot};
pub use mode::{AtomicLoopState, LoopState};
pub use observer::{ObserverRegistry, StateObserver};
pub use pipeline::{ControlCycle, LoopConfig, LoopEvent, control_loop, telegram_loop};
pub use slot::{CachedReader, LatestSlot};
pub use state::DriverContext;
pub use watchdog::LinkWatchdog;

pub use cobot_net::ConnectionState;
pub use cobot_protocol::{PortStatus, RobotState};
