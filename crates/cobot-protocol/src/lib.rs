//! # Cobot Protocol
//!
//! 机械臂实时通信协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `constants`: 端口、定点数倍率、版本门限等常量
//! - `state`: 机器人状态快照（`RobotState`）与数字 I/O 位域
//! - `telegram`: 状态报文解码
//! - `command`: 伺服命令帧编码
//!
//! ## 字节序
//!
//! 状态报文和命令帧均使用大端字节序（网络字节序）。

pub mod command;
pub mod constants;
pub mod state;
pub mod telegram;

// 重新导出常用类型
pub use command::{CommandEncoder, CommandFrame, ControlWord, DecodedCommand, decode_command};
pub use constants::*;
pub use state::{DigitalBits, PortStatus, ProtocolVersion, RobotState};
pub use telegram::{TelegramDecoder, declared_len, encode_telegram, telegram_len};

use thiserror::Error;

/// 报文解码错误
///
/// 解码失败的报文被整体丢弃，不会产生部分状态。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated telegram: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unsupported protocol version {major}.{minor}")]
    VersionUnsupported { major: u16, minor: u16 },

    #[error("Malformed telegram: {0}")]
    Malformed(String),
}

/// 命令编码错误
///
/// 只影响单次 `move` 调用，不影响控制循环。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Joint count mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Joint {joint} target is not a finite number")]
    NonFinite { joint: usize },
}
