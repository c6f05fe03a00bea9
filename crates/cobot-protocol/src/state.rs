//! 机器人状态快照定义
//!
//! `RobotState` 由解码器在每次成功解析报文后创建，之后只读。
//! 驱动层整体替换快照（从不原地修改），观察者总能看到一致的视图。

use std::fmt;

/// 协议版本标记（主版本 + 次版本）
///
/// 派生的 `Ord` 先比较主版本再比较次版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// 此版本的报文是否携带数字输出位
    pub fn has_output_bits(self) -> bool {
        self >= crate::constants::OUTPUT_BITS_SINCE_VERSION
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// 端口电平状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortStatus {
    /// 高电平（置位）
    Set,
    /// 低电平（复位）
    Reset,
}

impl PortStatus {
    pub fn is_set(self) -> bool {
        self == Self::Set
    }
}

impl From<bool> for PortStatus {
    fn from(value: bool) -> Self {
        if value { Self::Set } else { Self::Reset }
    }
}

/// 数字 I/O 位域
///
/// 每个端口占一位，例如 `0b101` 表示端口 0 和端口 2 为高电平。
/// 超出 64 位的端口号一律读作复位。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DigitalBits(pub u64);

impl DigitalBits {
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn is_set(self, port: u8) -> bool {
        port < 64 && (self.0 >> port) & 1 == 1
    }

    pub fn status(self, port: u8) -> PortStatus {
        PortStatus::from(self.is_set(port))
    }

    /// 返回修改指定端口后的新位域（自身不变）
    #[must_use]
    pub fn with(self, port: u8, status: PortStatus) -> Self {
        if port >= 64 {
            return self;
        }
        match status {
            PortStatus::Set => Self(self.0 | (1 << port)),
            PortStatus::Reset => Self(self.0 & !(1 << port)),
        }
    }
}

/// 机器人状态快照
///
/// 关节数组长度固定为配置的关节数；数值按控制器原样透传（即使超出量程）。
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotState {
    /// 报文协议版本
    pub version: ProtocolVersion,
    /// 控制器时间戳（秒，控制器上电起算）
    pub timestamp_s: f64,
    /// 目标关节位置（弧度）
    pub q_target: Vec<f64>,
    /// 实际关节位置（弧度）
    pub q_actual: Vec<f64>,
    /// 实际关节速度（rad/s）
    pub qd_actual: Vec<f64>,
    /// 数字输入位
    pub digital_inputs: DigitalBits,
    /// 数字输出位（版本 < 3.2 的报文不携带，恒为 0）
    pub digital_outputs: DigitalBits,
}

impl RobotState {
    /// 关节数量
    pub fn joint_count(&self) -> usize {
        self.q_actual.len()
    }

    /// 报文是否携带数字输出位
    pub fn has_output_bits(&self) -> bool {
        self.version.has_output_bits()
    }
}
