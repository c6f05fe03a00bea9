//! 协议常量定义
//!
//! 端口号、定点数倍率、版本门限等协议级常量。

use crate::state::ProtocolVersion;

/// 默认关节数量（六轴机械臂）
pub const DEFAULT_JOINT_COUNT: usize = 6;

/// 支持的最大关节数量
///
/// 命令帧缓冲区按此上限在栈上预留空间。
pub const MAX_JOINT_COUNT: usize = 16;

/// 关节位置定点数倍率
///
/// 命令帧中每个关节值为 `round(q * 1_000_000)`，即量化精度 1e-6 rad。
pub const JOINT_POSITION_MULTIPLIER: f64 = 1_000_000.0;

/// 控制器状态广播端口（实时状态订阅通道）
pub const DEFAULT_STATE_PORT: u16 = 30003;

/// 反向通道默认监听端口（控制器主动回连，承载命令流）
pub const DEFAULT_REVERSE_PORT: u16 = 50001;

/// 最低支持的协议版本
///
/// 低于此版本的报文字段偏移不同，解码器直接拒绝。
pub const MIN_SUPPORTED_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0);

/// 从此版本起报文携带数字输出位
pub const OUTPUT_BITS_SINCE_VERSION: ProtocolVersion = ProtocolVersion::new(3, 2);

/// 报文长度字段大小（u32）
pub const LENGTH_FIELD_SIZE: usize = 4;

/// 固定报文头大小：长度（4）+ 主版本（2）+ 次版本（2）
pub const TELEGRAM_HEADER_SIZE: usize = 8;

/// 单个报文的最大长度（1 MiB）
///
/// 声明长度超过此值视为结构错误，避免对端发送巨大长度导致内存耗尽。
pub const MAX_TELEGRAM_LEN: usize = 1 << 20;

/// 数字输入端口数量（u64 位域）
pub const DIGITAL_INPUT_PORTS: u8 = 64;

/// 数字输出端口数量（命令控制字中占 8 位）
pub const DIGITAL_OUTPUT_PORTS: u8 = 8;

/// 命令帧最大字节数：`4 * (MAX_JOINT_COUNT + 1)`
pub const MAX_COMMAND_FRAME_SIZE: usize = 4 * (MAX_JOINT_COUNT + 1);

/// 计算命令帧大小：每个关节 4 字节 + 4 字节控制字
#[inline]
pub const fn command_frame_size(joint_count: usize) -> usize {
    4 * (joint_count + 1)
}
