//! 状态报文（Telegram）解码
//!
//! 控制器在状态端口上周期性广播定长布局的二进制报文（大端字节序）：
//!
//! ```text
//! offset  size   field
//! 0       4      u32 length（整个报文长度，含本字段）
//! 4       2      u16 major_version
//! 6       2      u16 minor_version
//! 8       8      f64 controller timestamp (s)
//! 16      8*n    f64[n] q_target
//! ..      8*n    f64[n] q_actual
//! ..      8*n    f64[n] qd_actual
//! ..      8      u64 digital input bits
//! ..      8      u64 digital output bits   (version >= 3.2)
//! ```
//!
//! 版本标记紧跟长度字段：解码器在读取任何版本相关字段之前就能拒绝不支持的版本。
//! 声明长度大于布局所需时，多出的尾部字段（新版本扩展）被跳过。

use crate::DecodeError;
use crate::constants::*;
use crate::state::{DigitalBits, ProtocolVersion, RobotState};
use bytes::{Buf, BufMut};

/// 计算指定关节数和版本下报文的最小长度
pub fn telegram_len(joint_count: usize, version: ProtocolVersion) -> usize {
    let digital_words = if version.has_output_bits() { 2 } else { 1 };
    TELEGRAM_HEADER_SIZE + 8 + 3 * 8 * joint_count + 8 * digital_words
}

/// 读取报文头中声明的长度
///
/// 不足 4 字节时返回 `None`。
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    let head: [u8; LENGTH_FIELD_SIZE] = buf.get(..LENGTH_FIELD_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(head) as usize)
}

/// 状态报文解码器
///
/// 无状态，只记录关节数量；可在任意线程上复用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelegramDecoder {
    joint_count: usize,
}

impl TelegramDecoder {
    pub fn new(joint_count: usize) -> Self {
        Self { joint_count }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    /// 解码一个完整报文
    ///
    /// # 错误
    /// - `Truncated`: 缓冲区短于 4 字节或短于声明长度
    /// - `Malformed`: 声明长度小于报文头、超过上限，或不足以容纳该版本的字段
    /// - `VersionUnsupported`: 版本早于 3.0（不再解析后续字段）
    ///
    /// 超出量程的数值（包括 NaN）原样透传，控制器是唯一的事实来源。
    pub fn decode(&self, buf: &[u8]) -> Result<RobotState, DecodeError> {
        let declared = declared_len(buf).ok_or(DecodeError::Truncated {
            expected: LENGTH_FIELD_SIZE,
            actual: buf.len(),
        })?;

        if declared < TELEGRAM_HEADER_SIZE {
            return Err(DecodeError::Malformed(format!(
                "declared length {} is smaller than the {}-byte header",
                declared, TELEGRAM_HEADER_SIZE
            )));
        }
        if declared > MAX_TELEGRAM_LEN {
            return Err(DecodeError::Malformed(format!(
                "declared length {} exceeds limit {}",
                declared, MAX_TELEGRAM_LEN
            )));
        }
        if buf.len() < declared {
            return Err(DecodeError::Truncated {
                expected: declared,
                actual: buf.len(),
            });
        }

        let mut cur = &buf[LENGTH_FIELD_SIZE..declared];
        let version = ProtocolVersion::new(cur.get_u16(), cur.get_u16());
        if version < MIN_SUPPORTED_VERSION {
            return Err(DecodeError::VersionUnsupported {
                major: version.major,
                minor: version.minor,
            });
        }

        let required = telegram_len(self.joint_count, version);
        if declared < required {
            return Err(DecodeError::Malformed(format!(
                "declared length {} too short for version {} with {} joints (need {})",
                declared, version, self.joint_count, required
            )));
        }

        let timestamp_s = cur.get_f64();
        let q_target = read_joints(&mut cur, self.joint_count);
        let q_actual = read_joints(&mut cur, self.joint_count);
        let qd_actual = read_joints(&mut cur, self.joint_count);
        let digital_inputs = DigitalBits::new(cur.get_u64());
        let digital_outputs = if version.has_output_bits() {
            DigitalBits::new(cur.get_u64())
        } else {
            DigitalBits::default()
        };

        Ok(RobotState {
            version,
            timestamp_s,
            q_target,
            q_actual,
            qd_actual,
            digital_inputs,
            digital_outputs,
        })
    }
}

fn read_joints(cur: &mut &[u8], joint_count: usize) -> Vec<f64> {
    (0..joint_count).map(|_| cur.get_f64()).collect()
}

/// 将状态快照编码为报文（控制器侧）
///
/// 供模拟控制器和测试使用。关节数以 `q_actual` 为准，
/// `q_target` / `qd_actual` 长度不足时补 0，多余部分截断。
pub fn encode_telegram(state: &RobotState) -> Vec<u8> {
    let joint_count = state.q_actual.len();
    let len = telegram_len(joint_count, state.version);
    let mut buf = Vec::with_capacity(len);

    buf.put_u32(len as u32);
    buf.put_u16(state.version.major);
    buf.put_u16(state.version.minor);
    buf.put_f64(state.timestamp_s);
    put_joints(&mut buf, &state.q_target, joint_count);
    put_joints(&mut buf, &state.q_actual, joint_count);
    put_joints(&mut buf, &state.qd_actual, joint_count);
    buf.put_u64(state.digital_inputs.bits());
    if state.version.has_output_bits() {
        buf.put_u64(state.digital_outputs.bits());
    }

    debug_assert_eq!(buf.len(), len);
    buf
}

fn put_joints(buf: &mut Vec<u8>, values: &[f64], joint_count: usize) {
    for i in 0..joint_count {
        buf.put_f64(values.get(i).copied().unwrap_or(0.0));
    }
}
