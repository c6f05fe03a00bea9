//! 共享状态上下文
//!
//! 每条共享状态一把锁（或无锁），各自只在最短时间内持有：
//!
//! | 数据 | 同步方式 | 写端 | 读端 |
//! |------|---------|------|------|
//! | 最新 `RobotState` | ArcSwap（无锁） | 控制循环 | 任意线程 |
//! | `CommandTarget` | `LatestSlot`（读端 try_lock） | 调用方 | 控制循环 |
//! | 观察者列表 | Mutex + ArcSwap 快照 | 调用方 | 控制循环 |
//! | `ConnectionManager` | Mutex（控制循环 try_lock） | 生命周期方法 / 读取线程 | 控制循环 |
//! | 链路状态 | 原子变量 | `ConnectionManager` | 任意线程 |
//! | `DriverConfig` | ArcSwap（无锁） | `setup()` | 任意线程（含观察者回调） |

use crate::command::CommandTarget;
use crate::config::DriverConfig;
use crate::metrics::DriverMetrics;
use crate::observer::ObserverRegistry;
use crate::slot::LatestSlot;
use arc_swap::ArcSwapOption;
use cobot_net::{ConnectionManager, ConnectionState, LinkStatus};
use cobot_protocol::{DEFAULT_JOINT_COUNT, RobotState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct DriverContext {
    /// 最近一次成功解码的状态（尚未收到报文时为 `None`）
    pub robot_state: ArcSwapOption<RobotState>,
    /// 命令目标（后写覆盖）
    pub target: LatestSlot<CommandTarget>,
    pub observers: ObserverRegistry,
    /// 套接字所有者
    pub manager: Mutex<ConnectionManager>,
    /// 链路状态（无锁视图）
    pub link: Arc<LinkStatus>,
    pub metrics: DriverMetrics,
    /// 当前配置（`setup()` 之前为 `None`）
    pub config: ArcSwapOption<DriverConfig>,
    joint_count: AtomicUsize,
}

impl DriverContext {
    pub fn new(manager: ConnectionManager) -> Self {
        let link = manager.link_status();
        Self {
            robot_state: ArcSwapOption::empty(),
            target: LatestSlot::default(),
            observers: ObserverRegistry::new(),
            manager: Mutex::new(manager),
            link,
            metrics: DriverMetrics::new(),
            config: ArcSwapOption::empty(),
            joint_count: AtomicUsize::new(DEFAULT_JOINT_COUNT),
        }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_joint_count(&self, joint_count: usize) {
        self.joint_count.store(joint_count, Ordering::Release);
    }

    pub fn latest_state(&self) -> Option<Arc<RobotState>> {
        self.robot_state.load_full()
    }

    /// 丢弃已发布的状态（新连接上收到报文之前不再返回旧快照）
    pub(crate) fn clear_state(&self) {
        self.robot_state.store(None);
    }

    pub fn config(&self) -> Option<Arc<DriverConfig>> {
        self.config.load_full()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.state().is_connected()
    }
}

impl Default for DriverContext {
    fn default() -> Self {
        Self::new(ConnectionManager::default())
    }
}
