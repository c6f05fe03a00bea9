//! 模拟控制器
//!
//! 在本机回环上扮演控制器：
//! - 在状态端口上接受驱动连接，按固定周期（或手动）推送状态报文；
//! - 回连驱动的反向端口，接收并记录命令帧；
//! - 带 keepalive 的命令被立即"执行"：关节目标直接写入实际位置，
//!   输出请求写入数字输出位。
//!
//! 用于 CLI 的 `sim` 子命令和集成测试，不做任何动力学仿真。

use cobot_protocol::{
    DecodedCommand, DigitalBits, ProtocolVersion, RobotState, command_frame_size,
    decode_command, encode_telegram,
};
use parking_lot::{Condvar, Mutex};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 后台线程检查退出标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 模拟控制器配置
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// 关节数量
    pub joint_count: usize,
    /// 报文协议版本
    pub version: ProtocolVersion,
    /// 报文推送周期；`None` 表示只在 `send_telegram()` 时推送
    pub period: Option<Duration>,
    /// 状态端口（0 表示由系统分配）
    pub state_port: u16,
    /// 初始关节位置
    pub initial_q: Vec<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            joint_count: 6,
            version: ProtocolVersion::new(3, 2),
            period: Some(Duration::from_millis(8)),
            state_port: 0,
            initial_q: vec![0.0; 6],
        }
    }
}

impl SimConfig {
    /// 手动推送模式（测试用：每个报文由调用方显式触发）
    pub fn manual(joint_count: usize) -> Self {
        Self {
            joint_count,
            period: None,
            initial_q: vec![0.0; joint_count],
            ..Self::default()
        }
    }
}

struct SimShared {
    config: SimConfig,
    started: Instant,
    robot: Mutex<RobotState>,
    client: Mutex<Option<TcpStream>>,
    client_ready: Condvar,
    reverse: Mutex<Option<TcpStream>>,
    commands: Mutex<Vec<DecodedCommand>>,
    commands_ready: Condvar,
    telegrams_sent: AtomicU64,
}

impl SimShared {
    fn send_telegram(&self) -> io::Result<bool> {
        let telegram = {
            let mut robot = self.robot.lock();
            robot.timestamp_s = self.started.elapsed().as_secs_f64();
            encode_telegram(&robot)
        };
        self.send_raw(&telegram)
    }

    fn send_raw(&self, bytes: &[u8]) -> io::Result<bool> {
        let mut client = self.client.lock();
        let Some(stream) = client.as_mut() else {
            return Ok(false);
        };
        if let Err(e) = stream.write_all(bytes) {
            debug!("Simulated controller lost state client: {}", e);
            *client = None;
            return Err(e);
        }
        self.telegrams_sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn apply_command(&self, command: &DecodedCommand) {
        if !command.keepalive() {
            return;
        }
        let mut robot = self.robot.lock();
        if command.joints.len() == robot.q_actual.len() {
            robot.q_target.clone_from(&command.joints);
            robot.q_actual.clone_from(&command.joints);
        }
        if let Some(outputs) = command.control.outputs() {
            let preserved = robot.digital_outputs.bits() & !0xFF;
            robot.digital_outputs = DigitalBits::new(preserved | outputs.bits());
        }
    }
}

/// 回环模拟控制器
pub struct SimulatedController {
    state_addr: SocketAddr,
    shared: Arc<SimShared>,
    is_running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SimulatedController {
    /// 启动模拟控制器（绑定 127.0.0.1 上的状态端口）
    pub fn start(config: SimConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.state_port))?;
        listener.set_nonblocking(true)?;
        let state_addr = listener.local_addr()?;

        let mut q = config.initial_q.clone();
        q.resize(config.joint_count, 0.0);
        let robot = RobotState {
            version: config.version,
            timestamp_s: 0.0,
            q_target: q.clone(),
            q_actual: q,
            qd_actual: vec![0.0; config.joint_count],
            digital_inputs: DigitalBits::default(),
            digital_outputs: DigitalBits::default(),
        };

        let period = config.period;
        let shared = Arc::new(SimShared {
            config,
            started: Instant::now(),
            robot: Mutex::new(robot),
            client: Mutex::new(None),
            client_ready: Condvar::new(),
            reverse: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
            commands_ready: Condvar::new(),
            telegrams_sent: AtomicU64::new(0),
        });
        let is_running = Arc::new(AtomicBool::new(true));

        let mut threads = Vec::new();

        let accept_shared = shared.clone();
        let accept_running = is_running.clone();
        threads.push(thread::spawn(move || {
            accept_loop(listener, accept_shared, accept_running);
        }));

        if let Some(period) = period {
            let tick_shared = shared.clone();
            let tick_running = is_running.clone();
            threads.push(thread::spawn(move || {
                publish_loop(period, tick_shared, tick_running);
            }));
        }

        info!("Simulated controller serving state on {}", state_addr);
        Ok(Self {
            state_addr,
            shared,
            is_running,
            threads,
        })
    }

    pub fn state_addr(&self) -> SocketAddr {
        self.state_addr
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// 等待驱动连接状态端口
    pub fn wait_for_client(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut client = self.shared.client.lock();
        while client.is_none() {
            if self.shared.client_ready.wait_until(&mut client, deadline).timed_out() {
                return client.is_some();
            }
        }
        true
    }

    pub fn has_client(&self) -> bool {
        self.shared.client.lock().is_some()
    }

    /// 推送一个当前状态报文，没有客户端时返回 `Ok(false)`
    pub fn send_telegram(&self) -> io::Result<bool> {
        self.shared.send_telegram()
    }

    /// 推送任意字节（用于注入畸形报文）
    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<bool> {
        self.shared.send_raw(bytes)
    }

    /// 关闭状态通道（模拟控制器侧断线）
    pub fn drop_client(&self) {
        if let Some(stream) = self.shared.client.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// 回连驱动的反向端口
    ///
    /// 未指定地址（0.0.0.0）时改连 127.0.0.1。
    pub fn connect_reverse(&mut self, addr: SocketAddr) -> io::Result<()> {
        let target = if addr.ip().is_unspecified() {
            SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
        } else {
            addr
        };
        let stream = TcpStream::connect(target)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL * 10))?;
        let reader = stream.try_clone()?;
        *self.shared.reverse.lock() = Some(stream);
        info!("Simulated controller dialled reverse channel {}", target);

        let shared = self.shared.clone();
        let is_running = self.is_running.clone();
        self.threads.push(thread::spawn(move || {
            command_loop(reader, shared, is_running);
        }));
        Ok(())
    }

    /// 关闭反向通道
    pub fn close_reverse(&self) {
        if let Some(stream) = self.shared.reverse.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// 已接收的全部命令
    pub fn commands(&self) -> Vec<DecodedCommand> {
        self.shared.commands.lock().clone()
    }

    pub fn command_count(&self) -> usize {
        self.shared.commands.lock().len()
    }

    /// 等待累计收到至少 `count` 条命令
    pub fn wait_for_commands(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut commands = self.shared.commands.lock();
        while commands.len() < count {
            if self
                .shared
                .commands_ready
                .wait_until(&mut commands, deadline)
                .timed_out()
            {
                return commands.len() >= count;
            }
        }
        true
    }

    pub fn telegrams_sent(&self) -> u64 {
        self.shared.telegrams_sent.load(Ordering::Relaxed)
    }

    /// 当前模拟状态
    pub fn state(&self) -> RobotState {
        self.shared.robot.lock().clone()
    }

    /// 修改模拟状态（下一个报文生效）
    pub fn update_state(&self, f: impl FnOnce(&mut RobotState)) {
        f(&mut *self.shared.robot.lock());
    }

    /// 停止全部后台线程并关闭套接字
    pub fn shutdown(&mut self) {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.drop_client();
        self.close_reverse();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Simulated controller thread panicked");
            }
        }
        info!("Simulated controller stopped");
    }
}

impl Drop for SimulatedController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<SimShared>, is_running: Arc<AtomicBool>) {
    while is_running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false).and_then(|_| stream.set_nodelay(true)) {
                    warn!("Simulated controller failed to configure client {}: {}", peer, e);
                    continue;
                }
                info!("Simulated controller accepted state client {}", peer);
                let mut client = shared.client.lock();
                if let Some(old) = client.replace(stream) {
                    let _ = old.shutdown(Shutdown::Both);
                }
                shared.client_ready.notify_all();
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("Simulated controller accept error: {}", e);
                thread::sleep(POLL_INTERVAL);
            },
        }
    }
    trace!("Simulated controller accept loop exited");
}

fn publish_loop(period: Duration, shared: Arc<SimShared>, is_running: Arc<AtomicBool>) {
    let mut next = Instant::now() + period;
    while is_running.load(Ordering::Acquire) {
        let _ = shared.send_telegram();
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        next += period;
    }
    trace!("Simulated controller publish loop exited");
}

fn command_loop(mut stream: TcpStream, shared: Arc<SimShared>, is_running: Arc<AtomicBool>) {
    let frame_size = command_frame_size(shared.config.joint_count);
    let mut buf = vec![0u8; frame_size];
    let mut filled = 0;

    while is_running.load(Ordering::Acquire) {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                debug!("Reverse channel closed by driver");
                break;
            },
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Reverse channel read error: {}", e);
                break;
            },
        }
        if filled < frame_size {
            continue;
        }
        filled = 0;

        match decode_command(&buf, shared.config.joint_count) {
            Ok(command) => {
                trace!("Simulated controller received command: {:?}", command);
                shared.apply_command(&command);
                shared.commands.lock().push(command);
                shared.commands_ready.notify_all();
            },
            Err(e) => warn!("Simulated controller rejected command frame: {}", e),
        }
    }
    trace!("Simulated controller command loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::TelegramReader;
    use cobot_protocol::{CommandEncoder, TelegramDecoder};

    #[test]
    fn test_manual_telegrams_reach_client() {
        let sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
        assert!(!sim.send_telegram().unwrap());

        let client = TcpStream::connect(sim.state_addr()).unwrap();
        assert!(sim.wait_for_client(Duration::from_secs(2)));
        sim.update_state(|s| s.q_actual[2] = 0.75);
        assert!(sim.send_telegram().unwrap());

        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut reader = TelegramReader::new(client);
        let raw = reader.read_telegram().unwrap();
        let state = TelegramDecoder::new(6).decode(&raw).unwrap();
        assert_eq!(state.q_actual[2], 0.75);
        assert_eq!(sim.telegrams_sent(), 1);
    }

    #[test]
    fn test_reverse_commands_are_recorded_and_applied() {
        let driver_side = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sim = SimulatedController::start(SimConfig::manual(6)).unwrap();
        sim.connect_reverse(driver_side.local_addr().unwrap()).unwrap();
        let (mut reverse, _) = driver_side.accept().unwrap();

        let encoder = CommandEncoder::new(6);
        let target = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let frame = encoder
            .encode_with_outputs(&target, true, Some(DigitalBits::new(0b101)))
            .unwrap();
        reverse.write_all(frame.as_bytes()).unwrap();
        reverse.write_all(encoder.stop_frame().as_bytes()).unwrap();

        assert!(sim.wait_for_commands(2, Duration::from_secs(2)));
        let commands = sim.commands();
        assert!(commands[0].keepalive());
        assert!(!commands[1].keepalive());

        let state = sim.state();
        assert!((state.q_actual[5] - 0.6).abs() < 1e-6);
        assert_eq!(state.digital_outputs.bits(), 0b101);
    }

    #[test]
    fn test_periodic_mode_publishes_without_prompting() {
        let config = SimConfig {
            period: Some(Duration::from_millis(5)),
            ..SimConfig::default()
        };
        let sim = SimulatedController::start(config).unwrap();
        let _client = TcpStream::connect(sim.state_addr()).unwrap();
        assert!(sim.wait_for_client(Duration::from_secs(2)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while sim.telegrams_sent() < 3 {
            assert!(Instant::now() < deadline, "no periodic telegrams");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
