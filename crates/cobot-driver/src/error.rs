//! 驱动层错误类型定义

use cobot_net::{ConnectError, NetError};
use cobot_protocol::EncodeError;
use std::path::PathBuf;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 配置无效（`setup()` 同步返回，不会延迟到控制循环）
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 建链失败
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// 通道读写错误
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    /// 命令编码错误（只影响本次调用）
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// 尚未调用 `setup()`
    #[error("Driver not configured, call setup() first")]
    NotConfigured,

    /// 控制循环已在运行
    #[error("Control loop already running")]
    AlreadyRunning,

    /// 控制循环未运行
    #[error("Control loop not running")]
    NotRunning,

    /// 后台线程创建失败
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 数字 I/O 错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigitalIoError {
    /// 链路未连接或尚未收到任何报文
    #[error("Robot not connected")]
    NotConnected,

    #[error("Unknown I/O device {0} (0 = inputs, 1 = outputs)")]
    UnknownDevice(u8),

    #[error("Port {port} out of range (device has {count} ports)")]
    InvalidPort { port: u8, count: u8 },

    #[error("I/O device {0} is read-only")]
    ReadOnly(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        assert_eq!(
            DriverError::NotConfigured.to_string(),
            "Driver not configured, call setup() first"
        );
        assert_eq!(DriverError::Timeout.to_string(), "Operation timeout");

        let err = DriverError::from(EncodeError::LengthMismatch {
            expected: 6,
            actual: 2,
        });
        assert!(err.to_string().starts_with("Encode error"));

        let err = DriverError::from(ConfigError::invalid("gain", "must be within [100, 2000]"));
        let msg = err.to_string();
        assert!(msg.contains("gain") && msg.contains("[100, 2000]"), "{}", msg);
    }

    #[test]
    fn test_from_net_errors() {
        let err: DriverError = ConnectError::NotConnected.into();
        assert!(matches!(err, DriverError::Connect(ConnectError::NotConnected)));

        let err: DriverError = NetError::Closed.into();
        assert!(matches!(err, DriverError::Net(NetError::Closed)));
    }

    #[test]
    fn test_digital_io_error_display() {
        let err = DigitalIoError::InvalidPort { port: 9, count: 8 };
        assert_eq!(err.to_string(), "Port 9 out of range (device has 8 ports)");
        assert!(DigitalIoError::ReadOnly(0).to_string().contains("read-only"));
    }
}
