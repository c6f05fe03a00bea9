//! 伺服命令帧编码
//!
//! 命令帧为定长大端布局：
//!
//! ```text
//! [i32 × joint_count  关节位置定点数][i32 控制字]
//! ```
//!
//! 帧大小固定为 `4 * (joint_count + 1)` 字节。
//!
//! # 控制字
//!
//! | 位 | 含义 |
//! |----|------|
//! | 0 | keepalive（0 表示控制器停止执行流式伺服） |
//! | 1 | 本帧携带数字输出请求 |
//! | 8..15 | 请求的输出端口电平（端口 0-7） |
//!
//! 停止帧（空目标 + `keepalive = false`）的控制字恒为 0，与普通帧可区分。

use crate::constants::*;
use crate::state::DigitalBits;
use crate::{DecodeError, EncodeError};
use smallvec::SmallVec;

/// 命令帧缓冲区
///
/// 栈上预留 `MAX_COMMAND_FRAME_SIZE`（16 关节）字节，编码热路径无堆分配。
pub type FrameBuffer = SmallVec<[u8; MAX_COMMAND_FRAME_SIZE]>;

/// 控制字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlWord(pub u32);

impl ControlWord {
    const KEEPALIVE: u32 = 1 << 0;
    const OUTPUTS_PRESENT: u32 = 1 << 1;
    const OUTPUTS_SHIFT: u32 = 8;

    /// 构造控制字
    ///
    /// `keepalive = false` 时忽略输出请求，控制字为 0。
    pub fn new(keepalive: bool, outputs: Option<DigitalBits>) -> Self {
        if !keepalive {
            return Self(0);
        }
        let mut word = Self::KEEPALIVE;
        if let Some(bits) = outputs {
            word |= Self::OUTPUTS_PRESENT;
            word |= ((bits.bits() & 0xFF) as u32) << Self::OUTPUTS_SHIFT;
        }
        Self(word)
    }

    pub fn keepalive(self) -> bool {
        self.0 & Self::KEEPALIVE != 0
    }

    /// 帧中携带的输出请求（未携带时返回 `None`）
    pub fn outputs(self) -> Option<DigitalBits> {
        if self.0 & Self::OUTPUTS_PRESENT == 0 {
            return None;
        }
        Some(DigitalBits::new(((self.0 >> Self::OUTPUTS_SHIFT) & 0xFF) as u64))
    }
}

/// 编码完成的命令帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: FrameBuffer,
}

impl CommandFrame {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 读取帧尾的控制字
    pub fn control_word(&self) -> ControlWord {
        let tail = self.bytes.len().saturating_sub(4);
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[tail..]);
        ControlWord(u32::from_be_bytes(word))
    }

    pub fn keepalive(&self) -> bool {
        self.control_word().keepalive()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// 命令帧编码器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEncoder {
    joint_count: usize,
}

impl CommandEncoder {
    pub fn new(joint_count: usize) -> Self {
        Self { joint_count }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    /// 帧大小（字节）
    pub fn frame_size(&self) -> usize {
        command_frame_size(self.joint_count)
    }

    /// 检查目标向量是否可编码（不生成帧）
    ///
    /// 供 API 层在写入命令插槽前做同步校验。
    pub fn validate(&self, target: &[f64], keepalive: bool) -> Result<(), EncodeError> {
        if target.is_empty() && !keepalive {
            return Ok(());
        }
        if target.len() != self.joint_count {
            return Err(EncodeError::LengthMismatch {
                expected: self.joint_count,
                actual: target.len(),
            });
        }
        if let Some(joint) = target.iter().position(|q| !q.is_finite()) {
            return Err(EncodeError::NonFinite { joint });
        }
        Ok(())
    }

    /// 编码命令帧
    ///
    /// 每个关节值乘以 `JOINT_POSITION_MULTIPLIER` 后四舍五入，超出 i32 范围时饱和。
    ///
    /// # 错误
    /// - `LengthMismatch`: 目标长度与关节数不一致（停止帧除外）
    /// - `NonFinite`: 目标中含 NaN / 无穷大
    pub fn encode(&self, target: &[f64], keepalive: bool) -> Result<CommandFrame, EncodeError> {
        self.encode_with_outputs(target, keepalive, None)
    }

    /// 编码命令帧，并在控制字中携带数字输出请求
    pub fn encode_with_outputs(
        &self,
        target: &[f64],
        keepalive: bool,
        outputs: Option<DigitalBits>,
    ) -> Result<CommandFrame, EncodeError> {
        self.validate(target, keepalive)?;

        let mut bytes = FrameBuffer::new();
        for i in 0..self.joint_count {
            // 停止帧的目标为空，关节字段填 0
            let q = target.get(i).copied().unwrap_or(0.0);
            let raw = (q * JOINT_POSITION_MULTIPLIER).round() as i32;
            bytes.extend_from_slice(&raw.to_be_bytes());
        }
        let word = ControlWord::new(keepalive, outputs);
        bytes.extend_from_slice(&(word.0 as i32).to_be_bytes());

        Ok(CommandFrame { bytes })
    }

    /// 停止帧：空目标 + keepalive=0
    pub fn stop_frame(&self) -> CommandFrame {
        let mut bytes = FrameBuffer::new();
        bytes.resize(self.frame_size(), 0);
        CommandFrame { bytes }
    }
}

/// 控制器侧解析出的命令
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCommand {
    /// 关节目标（弧度，已除以定点数倍率）
    pub joints: Vec<f64>,
    /// 控制字
    pub control: ControlWord,
}

impl DecodedCommand {
    pub fn keepalive(&self) -> bool {
        self.control.keepalive()
    }
}

/// 解析命令帧（控制器侧）
///
/// 帧长度必须恰好为 `4 * (joint_count + 1)`。
pub fn decode_command(frame: &[u8], joint_count: usize) -> Result<DecodedCommand, DecodeError> {
    let expected = command_frame_size(joint_count);
    if frame.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: frame.len(),
        });
    }
    if frame.len() > expected {
        return Err(DecodeError::Malformed(format!(
            "command frame has {} bytes, expected {}",
            frame.len(),
            expected
        )));
    }

    let mut words = frame
        .chunks_exact(4)
        .map(|chunk| i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    let joints = words
        .by_ref()
        .take(joint_count)
        .map(|raw| raw as f64 / JOINT_POSITION_MULTIPLIER)
        .collect();
    let control = ControlWord(words.next().unwrap_or(0) as u32);

    Ok(DecodedCommand { joints, control })
}
