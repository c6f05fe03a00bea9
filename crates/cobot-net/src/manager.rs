//! 连接管理器
//!
//! 独占状态通道与反向通道的全部套接字。
//!
//! # 生命周期
//!
//! 1. `connect()`: 连接控制器状态端口（Disconnected → Connecting → Connected / Failed）
//! 2. `listen_for_reverse_channel()`: 在本地端口等待控制器回连
//! 3. `poll_reverse_channel()`: 非阻塞地接受回连（最多一条）
//! 4. `send_command()`: 写命令帧；写失败立即断开整条链路
//! 5. `disconnect()`: 释放所有套接字
//!
//! 链路断开后不会自动重连：必须显式再次调用 `connect()`。

use crate::state::{ConnectionEvent, ConnectionHandle, ConnectionState, LinkStatus};
use crate::tcp::{ReverseChannel, TcpTelegramSource};
use crate::{CommandSink, ConnectError, NetError};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 链路事件回调
///
/// 在持有管理器锁时调用，实现必须立即返回（例如 `try_send`）。
pub type EventNotifier = Box<dyn Fn(ConnectionEvent) + Send + Sync>;

/// 套接字选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// 建立状态通道的超时
    pub connect_timeout: Duration,
    /// 状态通道读超时（报文读取线程借此检查退出标志）
    pub read_timeout: Duration,
    /// 反向通道写超时
    pub write_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_millis(20),
        }
    }
}

/// 命令发送结果（非错误情况）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 已写入反向通道
    Sent,
    /// 控制器尚未回连，本次跳过（控制器继续执行上一条命令）
    NoReverseChannel,
    /// 状态通道未连接，本次跳过
    NotConnected,
}

pub struct ConnectionManager {
    options: ConnectionOptions,
    link: Arc<LinkStatus>,
    peer: Option<SocketAddr>,
    state_stream: Option<TcpStream>,
    listener: Option<TcpListener>,
    reverse: Option<Box<dyn CommandSink + Send>>,
    notifier: Option<EventNotifier>,
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            link: Arc::new(LinkStatus::new()),
            peer: None,
            state_stream: None,
            listener: None,
            reverse: None,
            notifier: None,
        }
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ConnectionOptions) {
        self.options = options;
    }

    /// 注册链路事件回调（替换已有回调）
    pub fn set_notifier(&mut self, notifier: EventNotifier) {
        self.notifier = Some(notifier);
    }

    pub fn clear_notifier(&mut self) {
        self.notifier = None;
    }

    /// 共享链路视图（无锁读取状态和代数）
    pub fn link_status(&self) -> Arc<LinkStatus> {
        self.link.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn generation(&self) -> u64 {
        self.link.generation()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 当前连接句柄（未连接时为 `None`）
    pub fn handle(&self) -> Option<ConnectionHandle> {
        let generation = self.link.connected_generation()?;
        let peer = self.peer?;
        Some(ConnectionHandle::new(generation, peer, self.link.clone()))
    }

    /// 连接控制器状态端口
    ///
    /// 已有连接时先断开旧连接。依次尝试地址解析出的每个地址，
    /// 全部失败时返回最后一个错误并进入 `Failed`。
    pub fn connect(&mut self, addr: impl ToSocketAddrs + std::fmt::Display) -> Result<ConnectionHandle, ConnectError> {
        self.disconnect();

        let addr_str = addr.to_string();
        self.link.set_state(ConnectionState::Connecting);
        info!("Connecting to controller state port at {}", addr_str);

        let candidates: Vec<SocketAddr> = match addr.to_socket_addrs() {
            Ok(iter) => iter.collect(),
            Err(e) => return Err(self.connect_failed(ConnectError::Unreachable { addr: addr_str, source: e })),
        };

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.options.connect_timeout) {
                Ok(stream) => match self.configure_state_stream(&stream) {
                    Ok(()) => return Ok(self.connected(stream, candidate)),
                    Err(e) => last_error = Some(e),
                },
                Err(e) => {
                    debug!("Connect attempt to {} failed: {}", candidate, e);
                    last_error = Some(e);
                },
            }
        }

        let err = match last_error {
            Some(e) => ConnectError::from_io(addr_str, e),
            None => ConnectError::Unreachable {
                addr: addr_str,
                source: std::io::Error::new(ErrorKind::NotFound, "address resolved to nothing"),
            },
        };
        Err(self.connect_failed(err))
    }

    fn configure_state_stream(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.options.read_timeout))
    }

    fn connected(&mut self, stream: TcpStream, peer: SocketAddr) -> ConnectionHandle {
        let generation = self.link.next_generation();
        self.state_stream = Some(stream);
        self.peer = Some(peer);
        self.link.set_state(ConnectionState::Connected);
        info!("Connected to controller at {} (generation {})", peer, generation);
        self.notify(ConnectionEvent::Connected { generation });
        ConnectionHandle::new(generation, peer, self.link.clone())
    }

    fn connect_failed(&mut self, err: ConnectError) -> ConnectError {
        error!("Failed to connect: {}", err);
        self.link.set_state(ConnectionState::Failed);
        self.notify(ConnectionEvent::Failed {
            generation: self.link.generation(),
        });
        err
    }

    /// 为报文读取线程克隆一个状态通道读端
    pub fn telegram_source(&self) -> Result<TcpTelegramSource, ConnectError> {
        let stream = self.state_stream.as_ref().ok_or(ConnectError::NotConnected)?;
        let clone = stream.try_clone().map_err(|e| ConnectError::Unreachable {
            addr: self.peer.map(|p| p.to_string()).unwrap_or_default(),
            source: e,
        })?;
        Ok(TcpTelegramSource::new(clone))
    }

    /// 在本地端口监听控制器回连
    ///
    /// 绑定所有 IPv4 地址；端口 0 表示由系统分配，返回实际绑定地址。
    /// 已在监听时先关闭旧的监听套接字和已接受的反向通道。
    pub fn listen_for_reverse_channel(&mut self, port: u16) -> Result<SocketAddr, ConnectError> {
        self.release_reverse();

        let bind = |port| -> std::io::Result<(TcpListener, SocketAddr)> {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
            listener.set_nonblocking(true)?;
            let local = listener.local_addr()?;
            Ok((listener, local))
        };

        let (listener, local) = bind(port).map_err(|source| ConnectError::Bind { port, source })?;
        info!("Listening for reverse channel on {}", local);
        self.listener = Some(listener);
        Ok(local)
    }

    /// 反向通道监听地址
    pub fn reverse_listen_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn has_reverse_channel(&self) -> bool {
        self.reverse.is_some()
    }

    /// 非阻塞地接受控制器回连
    ///
    /// 最多保留一条反向通道：已存在时新到的连接被立即关闭。
    /// 配置失败的连接同样被丢弃，不会留下半开的套接字。
    ///
    /// 返回调用结束后是否存在反向通道。
    pub fn poll_reverse_channel(&mut self) -> Result<bool, NetError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(self.reverse.is_some());
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if self.reverse.is_some() {
                        warn!("Rejecting extra reverse channel connection from {}", peer);
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    match ReverseChannel::new(stream, peer, self.options.write_timeout) {
                        Ok(channel) => {
                            info!("Reverse channel established from {}", peer);
                            self.reverse = Some(Box::new(channel));
                        },
                        Err(e) => {
                            warn!("Dropping reverse channel from {}: {}", peer, e);
                        },
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Io(e)),
            }
        }

        Ok(self.reverse.is_some())
    }

    /// 直接挂接一个命令去向（替换已有反向通道）
    pub fn attach_reverse_channel(&mut self, sink: Box<dyn CommandSink + Send>) {
        self.reverse = Some(sink);
    }

    /// 发送一帧命令
    ///
    /// 写失败（含写超时）时释放反向通道、停止监听、关闭状态通道并进入
    /// `Disconnected`，之后的调用返回 `NotConnected` 直到显式重连。
    pub fn send_command(&mut self, frame: &[u8]) -> Result<SendOutcome, NetError> {
        if !self.link.state().is_connected() {
            return Ok(SendOutcome::NotConnected);
        }

        if self.reverse.is_none()
            && let Err(e) = self.poll_reverse_channel()
        {
            warn!("Reverse channel accept failed: {}", e);
        }

        let Some(sink) = self.reverse.as_mut() else {
            return Ok(SendOutcome::NoReverseChannel);
        };

        match sink.send(frame) {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(e) => {
                error!("Failed to send command frame: {}", e);
                self.teardown(ConnectionState::Disconnected);
                Err(e)
            },
        }
    }

    /// 报文读取线程发现状态通道已断开
    ///
    /// 仅当 `generation` 仍是当前连接时生效，返回是否发生了状态转换。
    pub fn mark_lost(&mut self, generation: u64) -> bool {
        if self.link.connected_generation() != Some(generation) {
            return false;
        }
        warn!("State channel lost (generation {})", generation);
        self.teardown(ConnectionState::Disconnected);
        true
    }

    /// 断开并释放全部套接字
    pub fn disconnect(&mut self) {
        if self.link.state().is_connected() {
            info!("Disconnecting from controller");
        }
        self.teardown(ConnectionState::Disconnected);
        self.peer = None;
    }

    fn teardown(&mut self, next: ConnectionState) {
        let was_connected = self.link.state().is_connected();
        self.release_reverse();
        if let Some(stream) = self.state_stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.link.set_state(next);
        if was_connected {
            self.notify(ConnectionEvent::Disconnected {
                generation: self.link.generation(),
            });
        }
    }

    fn release_reverse(&mut self) {
        self.reverse = None;
        self.listener = None;
    }

    fn notify(&self, event: ConnectionEvent) {
        if let Some(notifier) = self.notifier.as_ref() {
            notifier(event);
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionOptions::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.release_reverse();
        if let Some(stream) = self.state_stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
