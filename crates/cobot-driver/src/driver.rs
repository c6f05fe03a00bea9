//! 驱动对外 API
//!
//! `RobotDriver` 持有共享上下文和两个后台线程（控制循环、报文读取），
//! 所有方法均为 `&self`，可在多个线程中同时调用。
//!
//! # 生命周期
//!
//! ```text
//! new() -> setup(config) -> start() -> [move_joints / attach / get_digital_io ...] -> stop()
//!                              Idle -> Running -> Stopping -> Idle
//! ```
//!
//! 链路断开后驱动保持 `Running`（继续运行控制循环，只是不再发送命令），
//! 由调用方显式调用 `reconnect()` 恢复。

use crate::config::{DriverConfig, ServoParams};
use crate::digital_io::{DigitalIo, IoDevice};
use crate::error::{DigitalIoError, DriverError};
use crate::metrics::{DriverMetrics, MetricsSnapshot};
use crate::mode::{AtomicLoopState, LoopState};
use crate::observer::StateObserver;
use crate::pipeline::{LoopConfig, LoopEvent, control_loop, telegram_loop};
use crate::state::DriverContext;
use cobot_net::{ConnectionEvent, ConnectionManager, ConnectionState, TcpTelegramSource};
use cobot_protocol::{CommandEncoder, RobotState};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 由辅助线程完成 join，超时后辅助线程继续等待（进程退出时回收）
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 生命周期相关的可变部分
///
/// 只在生命周期方法中短暂加锁，join 线程前必须先释放。
/// 配置不放在这里：观察者回调随时可能读取配置。
#[derive(Default)]
struct Lifecycle {
    events: Option<Sender<LoopEvent>>,
    is_running: Arc<AtomicBool>,
    control_thread: Option<JoinHandle<()>>,
    reader_thread: Option<JoinHandle<()>>,
}

/// 机械臂驱动
pub struct RobotDriver {
    ctx: Arc<DriverContext>,
    loop_state: AtomicLoopState,
    lifecycle: Mutex<Lifecycle>,
}

impl RobotDriver {
    pub fn new() -> Self {
        Self {
            ctx: Arc::new(DriverContext::new(ConnectionManager::default())),
            loop_state: AtomicLoopState::new(LoopState::Idle),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// 校验并保存配置
    ///
    /// 配置错误在这里同步返回；控制循环运行期间不能修改配置。
    pub fn setup(&self, config: DriverConfig) -> Result<(), DriverError> {
        config.validate()?;

        let _life = self.lifecycle.lock();
        if self.loop_state.get() != LoopState::Idle {
            return Err(DriverError::AlreadyRunning);
        }

        self.ctx.set_joint_count(config.joint_count);
        self.ctx.manager.lock().set_options(config.connection_options());
        info!(
            "Driver configured: host={}, joints={}, period={}s",
            config.host_address, config.joint_count, config.command_period_hint
        );
        self.ctx.config.store(Some(Arc::new(config)));
        Ok(())
    }

    /// 启动控制循环并连接控制器
    ///
    /// 每次启动都从零开始计数指标。建链失败时回滚到 `Idle` 并返回错误。
    pub fn start(&self) -> Result<(), DriverError> {
        let spawned = {
            let mut life = self.lifecycle.lock();
            let config = self.ctx.config().ok_or(DriverError::NotConfigured)?;
            self.loop_state
                .compare_exchange(LoopState::Idle, LoopState::Running)
                .map_err(|_| DriverError::AlreadyRunning)?;

            self.ctx.metrics.reset();
            self.spawn_threads(&mut life, &config).map(|()| config)
        };

        match spawned {
            Ok(config) => {
                info!("Driver started, controller at {}", config.state_addr());
                Ok(())
            },
            Err(e) => {
                error!("Driver failed to start: {}", e);
                self.shutdown();
                Err(e)
            },
        }
    }

    /// 停止控制循环并断开链路
    ///
    /// 未启动时为空操作；未发送的命令目标被丢弃。
    /// 可以在观察者回调中调用（此时不会 join 控制循环线程自身）。
    pub fn stop(&self) {
        if self
            .loop_state
            .compare_exchange(LoopState::Running, LoopState::Stopping)
            .is_err()
        {
            return;
        }

        self.shutdown();
        info!("Driver stopped");
    }

    /// 显式重连
    ///
    /// 断开当前链路（如果还在）并重新建立状态通道和反向通道监听。
    /// 断开期间写入的命令目标保留，链路恢复后发送。
    pub fn reconnect(&self) -> Result<(), DriverError> {
        let reader = {
            let mut life = self.lifecycle.lock();
            if !self.loop_state.get().is_running() {
                return Err(DriverError::NotRunning);
            }
            self.ctx.manager.lock().disconnect();
            life.reader_thread.take()
        };
        join_worker(reader, "Reader");

        let mut life = self.lifecycle.lock();
        // join 期间可能已经有人调用了 stop()
        if !self.loop_state.get().is_running() {
            return Err(DriverError::NotRunning);
        }
        let config = self.ctx.config().ok_or(DriverError::NotConfigured)?;
        info!("Reconnecting to {}", config.state_addr());
        self.open_link(&mut life, &config)
    }

    /// 设置伺服目标（后写覆盖，下一个报文周期发送）
    ///
    /// 长度与关节数不符或包含非有限值时返回 `Encode` 错误，已有目标不受影响。
    pub fn move_joints(&self, target: &[f64]) -> Result<(), DriverError> {
        if !self.loop_state.get().is_running() {
            return Err(DriverError::NotRunning);
        }
        CommandEncoder::new(self.ctx.joint_count()).validate(target, true)?;

        if self.ctx.target.update(|t| t.set_servo(target.to_vec())) {
            DriverMetrics::incr(&self.ctx.metrics.target_overwrites);
            trace!("Servo target overwritten before it was sent");
        }
        Ok(())
    }

    /// 停止流式伺服：下一帧命令 keepalive = 0，之后不再发送
    ///
    /// 停止帧写入反向通道后 `metrics().stop_frames_sent` 加一。
    pub fn stop_servo(&self) -> Result<(), DriverError> {
        if !self.loop_state.get().is_running() {
            return Err(DriverError::NotRunning);
        }
        self.ctx.target.update(|t| t.set_stop());
        Ok(())
    }

    /// 注册观察者（重复注册为空操作，返回是否为新注册）
    ///
    /// 链路已连接时注册的观察者从下一次链路变化开始收到 `on_connect`/`on_disconnect`。
    pub fn attach(&self, observer: Arc<dyn StateObserver>) -> bool {
        self.ctx.observers.attach(observer)
    }

    /// 注销观察者（未注册为空操作）
    pub fn detach(&self, observer: &Arc<dyn StateObserver>) -> bool {
        self.ctx.observers.detach(observer)
    }

    /// 获取数字 I/O 句柄（0 = 输入组，1 = 输出组）
    pub fn get_digital_io(&self, device_id: u8) -> Result<DigitalIo, DigitalIoError> {
        let device = IoDevice::try_from(device_id)?;
        Ok(DigitalIo::new(device, self.ctx.clone()))
    }

    /// 控制器地址（未配置时为空字符串）
    pub fn robot_url(&self) -> String {
        self.ctx
            .config()
            .map(|c| c.host_address.clone())
            .unwrap_or_default()
    }

    pub fn latest_state(&self) -> Option<Arc<RobotState>> {
        self.ctx.latest_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.connection_state()
    }

    /// 反向通道监听地址（控制器应回连的地址）
    pub fn reverse_channel_addr(&self) -> Option<SocketAddr> {
        self.ctx.manager.lock().reverse_listen_addr()
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn servo_params(&self) -> Option<ServoParams> {
        self.ctx.config().map(|c| c.servo_params())
    }

    /// 等待当前连接上的第一个状态快照
    ///
    /// 每次建立连接（`start()`/`reconnect()`）都会丢弃上一条连接的快照。
    pub fn wait_for_state(&self, timeout: Duration) -> Result<Arc<RobotState>, DriverError> {
        let start = Instant::now();

        loop {
            if let Some(state) = self.ctx.latest_state() {
                return Ok(state);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn spawn_threads(&self, life: &mut Lifecycle, config: &DriverConfig) -> Result<(), DriverError> {
        let (tx, rx) = crossbeam_channel::bounded(config.event_queue_capacity);
        let is_running = Arc::new(AtomicBool::new(true));
        life.is_running = is_running.clone();

        // 链路事件只唤醒控制循环，队列满时丢弃（控制循环以链路状态为准）
        let notifier_tx = tx.clone();
        self.ctx.manager.lock().set_notifier(Box::new(move |event| {
            let _ = notifier_tx.try_send(link_event(event));
        }));

        let loop_config = LoopConfig {
            joint_count: config.joint_count,
            watchdog_timeout: config.watchdog_timeout(),
        };
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name("cobot-control".into())
            .spawn(move || control_loop(rx, ctx, loop_config, is_running))
            .map_err(|source| DriverError::Spawn {
                name: "control",
                source,
            })?;
        life.control_thread = Some(handle);
        life.events = Some(tx);

        self.open_link(life, config)
    }

    /// 建立状态通道、开始监听反向通道并启动读取线程
    fn open_link(&self, life: &mut Lifecycle, config: &DriverConfig) -> Result<(), DriverError> {
        // 旧连接的快照不能冒充新连接的状态
        self.ctx.clear_state();

        let (source, generation) = {
            let mut manager = self.ctx.manager.lock();
            let opened = open_sockets(&mut manager, config);
            if opened.is_err() && manager.state().is_connected() {
                manager.disconnect();
            }
            opened?
        };

        let events = life.events.clone().ok_or(DriverError::NotRunning)?;
        let ctx = self.ctx.clone();
        let is_running = life.is_running.clone();
        let handle = thread::Builder::new()
            .name("cobot-reader".into())
            .spawn(move || telegram_loop(source, generation, events, ctx, is_running))
            .map_err(|source| DriverError::Spawn { name: "reader", source })?;
        life.reader_thread = Some(handle);
        Ok(())
    }

    /// 停止线程并回到 `Idle`
    ///
    /// 线程句柄在锁内取出，锁外 join：观察者回调在此期间仍可调用驱动的任何方法。
    fn shutdown(&self) {
        self.loop_state.set(LoopState::Stopping);

        let (control, reader) = {
            let mut life = self.lifecycle.lock();
            // Release: 线程看到 false 时也能看到之前的所有写入
            life.is_running.store(false, Ordering::Release);

            {
                let mut manager = self.ctx.manager.lock();
                manager.disconnect();
                manager.clear_notifier();
            }

            if let Some(events) = life.events.take()
                && events.send_timeout(LoopEvent::Shutdown, Duration::from_millis(100)).is_err()
            {
                trace!("Event queue busy, control loop will exit on its own");
            }

            (life.control_thread.take(), life.reader_thread.take())
        };

        join_worker(reader, "Reader");
        match control {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                // 从观察者回调内部停止：回调返回后循环自行退出
                warn!("stop() called from the control loop thread, not joining itself");
            },
            control => join_worker(control, "Control"),
        }

        self.ctx.target.update(|t| t.clear());
        self.ctx.clear_state();
        self.loop_state.set(LoopState::Idle);
    }
}

fn join_worker(handle: Option<JoinHandle<()>>, name: &str) {
    if let Some(handle) = handle
        && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
    {
        error!("{} thread panicked or failed to shut down within {:?}", name, JOIN_TIMEOUT);
    }
}

fn open_sockets(
    manager: &mut ConnectionManager,
    config: &DriverConfig,
) -> Result<(TcpTelegramSource, u64), DriverError> {
    let handle = manager.connect(config.state_addr())?;
    let reverse = manager.listen_for_reverse_channel(config.reverse_port)?;
    info!("Waiting for controller to dial back on {}", reverse);
    Ok((manager.telegram_source()?, handle.generation()))
}

fn link_event(event: ConnectionEvent) -> LoopEvent {
    match event {
        ConnectionEvent::Connected { generation } => LoopEvent::LinkUp { generation },
        ConnectionEvent::Disconnected { generation } | ConnectionEvent::Failed { generation } => {
            LoopEvent::LinkDown { generation }
        },
    }
}

impl Default for RobotDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RobotDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn local_config(listener: &TcpListener) -> DriverConfig {
        DriverConfig {
            host_address: "127.0.0.1".into(),
            state_port: listener.local_addr().unwrap().port(),
            reverse_port: 0,
            connect_timeout_ms: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_requires_setup() {
        let driver = RobotDriver::new();
        assert!(matches!(driver.start(), Err(DriverError::NotConfigured)));
        assert_eq!(driver.loop_state(), LoopState::Idle);
        assert_eq!(driver.robot_url(), "");
    }

    #[test]
    fn test_setup_rejects_invalid_config() {
        let driver = RobotDriver::new();
        let config = DriverConfig {
            joint_count: 0,
            ..Default::default()
        };
        assert!(matches!(driver.setup(config), Err(DriverError::Config(_))));
        assert!(driver.servo_params().is_none());
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let driver = RobotDriver::new();
        driver.stop();
        driver.stop();
        assert_eq!(driver.loop_state(), LoopState::Idle);
    }

    #[test]
    fn test_move_requires_running_loop() {
        let driver = RobotDriver::new();
        assert!(matches!(driver.move_joints(&[0.0; 6]), Err(DriverError::NotRunning)));
        assert!(matches!(driver.stop_servo(), Err(DriverError::NotRunning)));
        assert!(matches!(driver.reconnect(), Err(DriverError::NotRunning)));
    }

    #[test]
    fn test_start_and_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let driver = RobotDriver::new();
        driver.setup(local_config(&listener)).unwrap();
        assert_eq!(driver.robot_url(), "127.0.0.1");

        driver.start().unwrap();
        assert_eq!(driver.loop_state(), LoopState::Running);
        assert_eq!(driver.connection_state(), ConnectionState::Connected);
        assert!(driver.reverse_channel_addr().is_some());
        assert!(matches!(driver.start(), Err(DriverError::AlreadyRunning)));
        assert!(matches!(
            driver.setup(local_config(&listener)),
            Err(DriverError::AlreadyRunning)
        ));

        driver.stop();
        assert_eq!(driver.loop_state(), LoopState::Idle);
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
        assert!(driver.reverse_channel_addr().is_none());
    }

    #[test]
    fn test_failed_start_rolls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = local_config(&listener);
        drop(listener);

        let driver = RobotDriver::new();
        driver.setup(config).unwrap();
        assert!(matches!(driver.start(), Err(DriverError::Connect(_))));
        assert_eq!(driver.loop_state(), LoopState::Idle);
    }

    #[test]
    fn test_move_validates_length() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let driver = RobotDriver::new();
        driver.setup(local_config(&listener)).unwrap();
        driver.start().unwrap();

        assert!(matches!(driver.move_joints(&[0.0; 5]), Err(DriverError::Encode(_))));
        assert!(matches!(
            driver.move_joints(&[0.0, 0.0, f64::NAN, 0.0, 0.0, 0.0]),
            Err(DriverError::Encode(_))
        ));
        driver.move_joints(&[0.0; 6]).unwrap();
        driver.move_joints(&[0.1; 6]).unwrap();
        assert_eq!(driver.metrics().target_overwrites, 1);
    }

    #[test]
    fn test_restart_resets_metrics() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let driver = RobotDriver::new();
        driver.setup(local_config(&listener)).unwrap();
        driver.start().unwrap();
        driver.move_joints(&[0.0; 6]).unwrap();
        driver.move_joints(&[0.1; 6]).unwrap();
        driver.stop();
        assert_eq!(driver.metrics().target_overwrites, 1);

        driver.start().unwrap();
        assert_eq!(driver.metrics(), MetricsSnapshot::default());
    }

    #[test]
    fn test_get_digital_io() {
        let driver = RobotDriver::new();
        assert_eq!(driver.get_digital_io(0).unwrap().device(), IoDevice::Inputs);
        assert_eq!(driver.get_digital_io(1).unwrap().device(), IoDevice::Outputs);
        assert_eq!(driver.get_digital_io(9).unwrap_err(), DigitalIoError::UnknownDevice(9));
    }

    #[test]
    fn test_wait_for_state_times_out() {
        let driver = RobotDriver::new();
        assert!(matches!(
            driver.wait_for_state(Duration::from_millis(10)),
            Err(DriverError::Timeout)
        ));
    }
}
