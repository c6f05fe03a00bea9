//! # Cobot Net
//!
//! 机械臂控制器的网络链路层。
//!
//! 一台控制器对应两条 TCP 通道：
//! - 状态通道：驱动主动连接控制器的状态端口，持续接收周期报文；
//! - 反向通道：驱动监听本地端口，由控制器回连，承载伺服命令流。
//!
//! `ConnectionManager` 独占这两条通道的套接字。断线不会自动重连，
//! 必须由调用方显式发起。

use std::io;
use thiserror::Error;

pub mod framing;
pub mod manager;
pub mod sim;
pub mod state;
pub mod tcp;

pub use framing::TelegramReader;
pub use manager::{ConnectionManager, ConnectionOptions, EventNotifier, SendOutcome};
pub use sim::{SimConfig, SimulatedController};
pub use state::{
    AtomicConnectionState, ConnectionEvent, ConnectionHandle, ConnectionState, LinkStatus,
};
pub use tcp::{ReverseChannel, TcpTelegramSource};

/// 建链错误
///
/// 都可以通过调用方重试恢复。
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Address {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {addr} refused")]
    Refused { addr: String },

    #[error("Connection to {addr} timed out")]
    Timeout { addr: String },

    #[error("Failed to bind reverse channel port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Not connected")]
    NotConnected,
}

impl ConnectError {
    /// 按 IO 错误类型归类连接失败
    pub fn from_io(addr: impl Into<String>, err: io::Error) -> Self {
        let addr = addr.into();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused { addr },
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout { addr },
            _ => Self::Unreachable { addr, source: err },
        }
    }
}

/// 通道读写错误
#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Read timeout")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,

    #[error("Invalid telegram length prefix: {0}")]
    InvalidLength(usize),
}

impl NetError {
    /// 是否意味着链路已不可用
    ///
    /// 超时只是没有数据，其他错误都需要重建连接。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NetError::Timeout)
    }
}

/// 状态报文来源
///
/// 每次调用返回一个完整报文（含长度前缀）。没有数据时应在有限时间内返回
/// `NetError::Timeout`，以便调用线程检查退出标志。
pub trait TelegramSource {
    fn receive(&mut self) -> Result<Vec<u8>, NetError>;
}

/// 命令帧去向
pub trait CommandSink {
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError>;
}
