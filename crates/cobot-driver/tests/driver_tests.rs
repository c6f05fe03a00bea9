//! 驱动端到端测试
//!
//! 使用回环上的模拟控制器（手动推送模式），每个报文由测试显式触发。

use cobot_driver::{
    ConnectionState, DigitalIoError, DriverConfig, LoopState, PortStatus, RobotDriver, RobotState,
    StateObserver,
};
use cobot_net::{SimConfig, SimulatedController};
use cobot_protocol::{DigitalBits, ProtocolVersion, encode_telegram};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn config_for(sim: &SimulatedController) -> DriverConfig {
    DriverConfig {
        host_address: "127.0.0.1".into(),
        state_port: sim.state_addr().port(),
        reverse_port: 0,
        connect_timeout_ms: 500,
        ..Default::default()
    }
}

/// 启动驱动并让模拟控制器回连反向通道
fn start_driver(sim: &mut SimulatedController, config: DriverConfig) -> RobotDriver {
    let driver = RobotDriver::new();
    driver.setup(config).unwrap();
    driver.start().unwrap();
    assert!(sim.wait_for_client(TIMEOUT));
    sim.connect_reverse(driver.reverse_channel_addr().unwrap()).unwrap();
    driver
}

/// 推送一个报文并等待驱动解码
fn tick(sim: &SimulatedController, driver: &RobotDriver) {
    let before = driver.metrics().telegrams_decoded;
    assert!(sim.send_telegram().unwrap());
    assert!(wait_until(TIMEOUT, || driver.metrics().telegrams_decoded > before));
}

#[derive(Default)]
struct CountingObserver {
    updates: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl StateObserver for CountingObserver {
    fn on_state_update(&self, _state: &Arc<RobotState>) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_state_is_published() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    sim.update_state(|s| s.q_actual = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    assert!(sim.send_telegram().unwrap());
    let state = driver.wait_for_state(TIMEOUT).unwrap();
    assert_eq!(state.q_actual, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    assert_eq!(state.version, ProtocolVersion::new(3, 2));
    assert_eq!(driver.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_servo_target_is_streamed() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    let target = [0.5, -0.25, 1.0, 0.0, 0.125, -1.5];
    driver.move_joints(&target).unwrap();

    for expected in 1..=3 {
        tick(&sim, &driver);
        assert!(sim.wait_for_commands(expected, TIMEOUT));
    }

    for command in sim.commands() {
        assert!(command.keepalive());
        for (sent, want) in command.joints.iter().zip(target) {
            assert!((sent - want).abs() < 1e-6);
        }
    }
    // 模拟控制器执行了命令
    assert!((sim.state().q_actual[0] - 0.5).abs() < 1e-6);
}

#[test]
fn test_at_most_one_frame_per_telegram() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    driver.move_joints(&[0.1; 6]).unwrap();

    for _ in 0..20 {
        assert!(sim.send_telegram().unwrap());
    }
    assert!(wait_until(TIMEOUT, || {
        let m = driver.metrics();
        m.telegrams_decoded + m.telegrams_dropped >= 20
    }));
    thread::sleep(Duration::from_millis(50));

    let metrics = driver.metrics();
    assert!(metrics.frames_sent <= metrics.telegrams_decoded);
    assert!(sim.command_count() as u64 <= metrics.telegrams_decoded);
    assert!(sim.command_count() >= 1);
}

#[test]
fn test_only_latest_target_is_sent() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    driver.move_joints(&[1.0; 6]).unwrap();
    driver.move_joints(&[2.0; 6]).unwrap();
    tick(&sim, &driver);
    tick(&sim, &driver);
    assert!(sim.wait_for_commands(2, TIMEOUT));

    for command in sim.commands() {
        assert!(command.joints.iter().all(|q| (q - 2.0).abs() < 1e-6));
    }
    assert_eq!(driver.metrics().target_overwrites, 1);
}

#[test]
fn test_stop_servo_sends_keepalive_zero_once() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    driver.move_joints(&[0.3; 6]).unwrap();
    tick(&sim, &driver);
    assert!(sim.wait_for_commands(1, TIMEOUT));

    driver.stop_servo().unwrap();
    tick(&sim, &driver);
    assert!(sim.wait_for_commands(2, TIMEOUT));
    tick(&sim, &driver);
    tick(&sim, &driver);
    thread::sleep(Duration::from_millis(50));

    let commands = sim.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].keepalive());
    assert!(!commands[1].keepalive());
    assert_eq!(commands[1].control.0, 0);
}

#[test]
fn test_digital_io_round_trip() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    sim.update_state(|s| s.digital_inputs = DigitalBits::new(0b10));
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    let inputs = driver.get_digital_io(0).unwrap();
    let outputs = driver.get_digital_io(1).unwrap();
    tick(&sim, &driver);

    assert_eq!(inputs.read(1), Ok(PortStatus::Set));
    assert_eq!(inputs.read(0), Ok(PortStatus::Reset));
    assert_eq!(inputs.write(0, PortStatus::Set), Err(DigitalIoError::ReadOnly(0)));

    // 空闲时写输出：以当前位置的保持帧送达
    outputs.write(3, PortStatus::Set).unwrap();
    tick(&sim, &driver);
    assert!(sim.wait_for_commands(1, TIMEOUT));
    assert_eq!(sim.commands()[0].control.outputs(), Some(DigitalBits::new(0b1000)));

    tick(&sim, &driver);
    assert_eq!(outputs.read(3), Ok(PortStatus::Set));
    assert_eq!(outputs.read(2), Ok(PortStatus::Reset));
}

#[test]
fn test_malformed_telegram_is_dropped() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    let observer = Arc::new(CountingObserver::default());
    driver.attach(observer.clone());

    tick(&sim, &driver);
    let before = driver.latest_state().unwrap();

    // 长度字段正确但版本过旧：报文被丢弃，流保持同步
    let legacy = encode_telegram(&RobotState {
        version: ProtocolVersion::new(2, 9),
        q_actual: vec![9.0; 6],
        ..Default::default()
    });
    assert!(sim.send_raw(&legacy).unwrap());
    assert!(wait_until(TIMEOUT, || driver.metrics().decode_errors == 1));
    assert!(Arc::ptr_eq(&before, &driver.latest_state().unwrap()));

    tick(&sim, &driver);
    assert_eq!(observer.updates.load(Ordering::SeqCst), 2);
    assert_eq!(driver.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_duplicate_attach_and_detach() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    let observer = Arc::new(CountingObserver::default());
    let handle: Arc<dyn StateObserver> = observer.clone();
    assert!(driver.attach(handle.clone()));
    assert!(!driver.attach(handle.clone()));

    tick(&sim, &driver);
    assert_eq!(observer.updates.load(Ordering::SeqCst), 1);

    assert!(driver.detach(&handle));
    assert!(!driver.detach(&handle));
    tick(&sim, &driver);
    assert_eq!(observer.updates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_disconnect_and_explicit_reconnect() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    let observer = Arc::new(CountingObserver::default());
    driver.attach(observer.clone());

    tick(&sim, &driver);
    assert_eq!(observer.connects.load(Ordering::SeqCst), 1);

    // 控制器侧断线：链路进入 Disconnected，不会自动重连
    sim.drop_client();
    assert!(wait_until(TIMEOUT, || observer.disconnects.load(Ordering::SeqCst) == 1));
    assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    assert_eq!(driver.loop_state(), LoopState::Running);
    assert_eq!(
        driver.get_digital_io(0).unwrap().read(0),
        Err(DigitalIoError::NotConnected)
    );

    // 断开期间写入的目标在显式重连后发送
    driver.move_joints(&[0.7; 6]).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sim.command_count(), 0);

    driver.reconnect().unwrap();
    assert!(sim.wait_for_client(TIMEOUT));
    sim.connect_reverse(driver.reverse_channel_addr().unwrap()).unwrap();
    tick(&sim, &driver);
    assert!(sim.wait_for_commands(1, TIMEOUT));
    assert!(sim.commands()[0].joints.iter().all(|q| (q - 0.7).abs() < 1e-6));

    assert!(wait_until(TIMEOUT, || observer.connects.load(Ordering::SeqCst) == 2));
    assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reconnect_discards_previous_state() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    sim.update_state(|s| s.q_actual = vec![0.9; 6]);
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    tick(&sim, &driver);
    assert!(driver.latest_state().is_some());

    sim.drop_client();
    assert!(wait_until(TIMEOUT, || driver.connection_state() == ConnectionState::Disconnected));
    driver.reconnect().unwrap();
    assert!(sim.wait_for_client(TIMEOUT));

    // 新连接上还没有报文
    assert!(driver.latest_state().is_none());
    assert!(matches!(
        driver.wait_for_state(Duration::from_millis(50)),
        Err(cobot_driver::DriverError::Timeout)
    ));

    sim.update_state(|s| s.q_actual = vec![0.3; 6]);
    assert!(sim.send_telegram().unwrap());
    let state = driver.wait_for_state(TIMEOUT).unwrap();
    assert_eq!(state.q_actual, vec![0.3; 6]);
}

#[test]
fn test_stop_and_restart() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    let observer = Arc::new(CountingObserver::default());
    driver.attach(observer.clone());
    tick(&sim, &driver);

    driver.move_joints(&[0.2; 6]).unwrap();
    driver.stop();
    assert_eq!(driver.loop_state(), LoopState::Idle);
    assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
    assert!(matches!(
        driver.move_joints(&[0.2; 6]),
        Err(cobot_driver::DriverError::NotRunning)
    ));

    // 模拟控制器不会察觉驱动侧断开，先丢弃旧连接
    sim.drop_client();
    driver.start().unwrap();
    assert!(sim.wait_for_client(TIMEOUT));
    sim.connect_reverse(driver.reverse_channel_addr().unwrap()).unwrap();
    tick(&sim, &driver);
    assert_eq!(observer.connects.load(Ordering::SeqCst), 2);
    // stop() 丢弃了未发送的目标
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sim.command_count(), 0);
}

#[test]
fn test_restart_without_telegram_has_no_state() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    sim.update_state(|s| {
        s.q_actual = vec![0.9; 6];
        s.digital_inputs = DigitalBits::new(0b1);
    });
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);
    tick(&sim, &driver);
    assert_eq!(driver.get_digital_io(0).unwrap().read(0), Ok(PortStatus::Set));

    driver.stop();
    assert!(driver.latest_state().is_none());

    sim.drop_client();
    driver.start().unwrap();
    assert!(sim.wait_for_client(TIMEOUT));
    assert_eq!(driver.connection_state(), ConnectionState::Connected);

    assert!(matches!(
        driver.wait_for_state(Duration::from_millis(50)),
        Err(cobot_driver::DriverError::Timeout)
    ));
    assert_eq!(
        driver.get_digital_io(0).unwrap().read(0),
        Err(DigitalIoError::NotConnected)
    );
}

#[test]
fn test_stop_while_callback_reads_driver() {
    struct SlowReader {
        driver: Weak<RobotDriver>,
        entered: AtomicUsize,
        urls: parking_lot::Mutex<Vec<String>>,
    }

    impl StateObserver for SlowReader {
        fn on_state_update(&self, _state: &Arc<RobotState>) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            if let Some(driver) = self.driver.upgrade() {
                self.urls.lock().push(driver.robot_url());
                let _ = driver.servo_params();
            }
        }
    }

    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = Arc::new(start_driver(&mut sim, config));
    let observer = Arc::new(SlowReader {
        driver: Arc::downgrade(&driver),
        entered: AtomicUsize::new(0),
        urls: parking_lot::Mutex::new(Vec::new()),
    });
    driver.attach(observer.clone());
    let counter = Arc::new(CountingObserver::default());
    driver.attach(counter.clone());

    assert!(sim.send_telegram().unwrap());
    assert!(wait_until(TIMEOUT, || observer.entered.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(30));

    // 回调仍在运行时停止：stop() 等到控制循环真正退出，而不是超时放弃
    let start = Instant::now();
    driver.stop();
    assert!(start.elapsed() < Duration::from_secs(1), "stop() took {:?}", start.elapsed());

    assert_eq!(*observer.urls.lock(), vec!["127.0.0.1".to_string()]);
    // 控制循环退出前补发的 on_disconnect 已经送达
    assert_eq!(counter.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(driver.loop_state(), LoopState::Idle);
}

#[test]
fn test_stop_from_observer_callback() {
    struct StopOnFirstState {
        driver: Weak<RobotDriver>,
    }

    impl StateObserver for StopOnFirstState {
        fn on_state_update(&self, _state: &Arc<RobotState>) {
            if let Some(driver) = self.driver.upgrade() {
                driver.stop();
            }
        }
    }

    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = config_for(&sim);
    let driver = Arc::new(start_driver(&mut sim, config));
    driver.attach(Arc::new(StopOnFirstState {
        driver: Arc::downgrade(&driver),
    }));

    assert!(sim.send_telegram().unwrap());
    assert!(wait_until(TIMEOUT, || driver.loop_state() == LoopState::Idle));
    assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn test_watchdog_reports_stall() {
    let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
    let config = DriverConfig {
        command_period_hint: 0.005,
        ..config_for(&sim)
    };
    let driver = start_driver(&mut sim, config);

    tick(&sim, &driver);
    assert!(wait_until(TIMEOUT, || driver.metrics().link_stalls >= 1));
    // 看门狗只记录，不拆除链路
    assert_eq!(driver.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_periodic_simulator() {
    let config = SimConfig::default();
    let mut sim = SimulatedController::start(config).unwrap();
    let config = config_for(&sim);
    let driver = start_driver(&mut sim, config);

    driver.move_joints(&[0.4; 6]).unwrap();
    assert!(sim.wait_for_commands(10, TIMEOUT));
    assert!(wait_until(TIMEOUT, || {
        driver
            .latest_state()
            .is_some_and(|s| s.q_actual.iter().all(|q| (q - 0.4).abs() < 1e-6))
    }));

    driver.stop();
    assert!(driver.metrics().frames_sent >= 10);
}
