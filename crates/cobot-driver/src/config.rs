//! 驱动配置
//!
//! 从 TOML 加载，所有字段都有默认值：
//!
//! ```toml
//! host_address = "192.168.1.10"
//! command_period_hint = 0.008
//! lookahead = 0.05
//! gain = 300.0
//! joint_count = 6
//! ```

use crate::error::ConfigError;
use cobot_net::ConnectionOptions;
use cobot_protocol::{DEFAULT_JOINT_COUNT, DEFAULT_REVERSE_PORT, DEFAULT_STATE_PORT, MAX_JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// lookahead 允许范围（秒）
pub const LOOKAHEAD_RANGE: (f64, f64) = (0.03, 0.2);
/// gain 允许范围
pub const GAIN_RANGE: (f64, f64) = (100.0, 2000.0);
/// 看门狗超时下限
pub const MIN_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(100);

/// 驱动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// 控制器地址（主机名或 IP）
    pub host_address: String,
    /// 控制器状态端口
    pub state_port: u16,
    /// 本地反向通道监听端口（0 表示由系统分配）
    pub reverse_port: u16,
    /// 命令周期提示（秒），即控制器的伺服跟踪时间
    pub command_period_hint: f64,
    /// 伺服前瞻时间（秒）
    pub lookahead: f64,
    /// 伺服增益
    pub gain: f64,
    /// 关节数量
    pub joint_count: usize,
    /// 建链超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 状态通道读超时（毫秒）
    pub read_timeout_ms: u64,
    /// 反向通道写超时（毫秒）
    pub write_timeout_ms: u64,
    /// 控制循环事件队列容量
    pub event_queue_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host_address: "localhost".to_string(),
            state_port: DEFAULT_STATE_PORT,
            reverse_port: DEFAULT_REVERSE_PORT,
            command_period_hint: 0.08,
            lookahead: 0.05,
            gain: 300.0,
            joint_count: DEFAULT_JOINT_COUNT,
            connect_timeout_ms: 2000,
            read_timeout_ms: 50,
            write_timeout_ms: 20,
            event_queue_capacity: 16,
        }
    }
}

/// 伺服参数（供外部生成控制器侧程序使用）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoParams {
    /// 伺服跟踪时间（秒）
    pub time: f64,
    pub lookahead: f64,
    pub gain: f64,
}

impl DriverConfig {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载并校验
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 校验所有字段
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_address.trim().is_empty() {
            return Err(ConfigError::invalid("host_address", "must not be empty"));
        }
        if !(1..=MAX_JOINT_COUNT).contains(&self.joint_count) {
            return Err(ConfigError::invalid(
                "joint_count",
                format!("must be within 1..={}, got {}", MAX_JOINT_COUNT, self.joint_count),
            ));
        }
        if !(self.command_period_hint.is_finite() && self.command_period_hint > 0.0) {
            return Err(ConfigError::invalid(
                "command_period_hint",
                format!("must be a positive number of seconds, got {}", self.command_period_hint),
            ));
        }
        check_range("lookahead", self.lookahead, LOOKAHEAD_RANGE)?;
        check_range("gain", self.gain, GAIN_RANGE)?;
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid("connect_timeout_ms", "must be positive"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("read_timeout_ms", "must be positive"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::invalid("write_timeout_ms", "must be positive"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::invalid("event_queue_capacity", "must be positive"));
        }
        Ok(())
    }

    /// 状态通道地址（`host:port`）
    pub fn state_addr(&self) -> String {
        format!("{}:{}", self.host_address, self.state_port)
    }

    /// 连接看门狗超时：`max(10 * 周期, 100ms)`
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_period_hint * 10.0).max(MIN_WATCHDOG_TIMEOUT)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn servo_params(&self) -> ServoParams {
        ServoParams {
            time: self.command_period_hint,
            lookahead: self.lookahead,
            gain: self.gain,
        }
    }
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be within [{}, {}], got {}", min, max, value),
        ))
    }
}
