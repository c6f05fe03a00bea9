//! 命令目标定义
//!
//! `CommandTarget` 存放在最新值插槽中：调用方覆盖写入，控制循环每个报文周期读取一次。
//!
//! # 发送规则
//!
//! | motion | 每个报文周期的行为 |
//! |--------|-------------------|
//! | `Idle` | 不发送（有待发输出请求时发送一帧原地保持命令） |
//! | `Servo(q)` | 发送 `q`（keepalive = 1），直到被替换 |
//! | `Stop` | 发送一帧停止帧（keepalive = 0），成功后回到 `Idle` |
//!
//! 数字输出请求随下一帧 keepalive 命令一起发送（控制字复用），
//! 发送成功后清除 `outputs_dirty`。

use cobot_protocol::{CommandEncoder, CommandFrame, DigitalBits, EncodeError, PortStatus};

/// 运动请求
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Motion {
    /// 无运动请求（默认）
    #[default]
    Idle,
    /// 流式伺服目标（弧度）
    Servo(Vec<f64>),
    /// 停止流式伺服
    Stop,
}

/// 共享命令目标
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandTarget {
    pub motion: Motion,
    /// 请求的数字输出电平（端口 0-7）
    pub outputs: DigitalBits,
    /// 输出请求尚未送达控制器
    pub outputs_dirty: bool,
    /// 写入序号（每次调用方写入递增）
    pub seq: u64,
    /// 控制循环是否已读到当前写入
    pub observed: bool,
}

/// 规划出的一帧命令
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFrame {
    pub frame: CommandFrame,
    /// 规划时的写入序号（提交时校验）
    pub seq: u64,
    pub kind: FrameKind,
    /// 本帧是否携带输出请求
    pub carries_outputs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Servo,
    /// 原地保持（仅为送达输出请求）
    Hold,
    Stop,
}

impl CommandTarget {
    /// 写入伺服目标
    ///
    /// 返回是否覆盖了一个控制循环尚未读到的伺服目标。
    pub fn set_servo(&mut self, q: Vec<f64>) -> bool {
        let overwritten = !self.observed && matches!(self.motion, Motion::Servo(_));
        self.motion = Motion::Servo(q);
        self.touch();
        overwritten
    }

    /// 请求停止流式伺服
    pub fn set_stop(&mut self) {
        self.motion = Motion::Stop;
        self.touch();
    }

    /// 设置一个输出端口的请求电平
    pub fn set_output(&mut self, port: u8, status: PortStatus) {
        self.outputs = self.outputs.with(port, status);
        self.outputs_dirty = true;
        self.touch();
    }

    /// 丢弃所有待发请求（输出电平保留，仅清除待发标记）
    pub fn clear(&mut self) {
        self.motion = Motion::Idle;
        self.outputs_dirty = false;
        self.touch();
    }

    fn touch(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.observed = false;
    }

    /// 规划本周期要发送的帧
    ///
    /// `hold` 为机器人当前实际位置，仅在 `Idle` 且有待发输出请求时使用。
    pub fn plan(&self, encoder: &CommandEncoder, hold: Option<&[f64]>) -> Result<Option<PlannedFrame>, EncodeError> {
        let outputs = self.outputs_dirty.then_some(self.outputs);
        let planned = |frame, kind, carries_outputs| PlannedFrame {
            frame,
            seq: self.seq,
            kind,
            carries_outputs,
        };

        match &self.motion {
            Motion::Servo(q) => {
                let frame = encoder.encode_with_outputs(q, true, outputs)?;
                Ok(Some(planned(frame, FrameKind::Servo, outputs.is_some())))
            },
            Motion::Stop => Ok(Some(planned(encoder.stop_frame(), FrameKind::Stop, false))),
            Motion::Idle => match (outputs, hold) {
                (Some(_), Some(q)) => {
                    let frame = encoder.encode_with_outputs(q, true, outputs)?;
                    Ok(Some(planned(frame, FrameKind::Hold, true)))
                },
                _ => Ok(None),
            },
        }
    }

    /// 帧发送成功后提交
    ///
    /// 写入序号已变化（调用方在发送期间又写入了新请求）时不做任何修改，返回 false。
    pub fn commit(&mut self, sent: &PlannedFrame) -> bool {
        if self.seq != sent.seq {
            return false;
        }
        if sent.kind == FrameKind::Stop {
            self.motion = Motion::Idle;
        }
        if sent.carries_outputs {
            self.outputs_dirty = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> CommandEncoder {
        CommandEncoder::new(6)
    }

    #[test]
    fn test_idle_plans_nothing() {
        let target = CommandTarget::default();
        assert_eq!(target.plan(&encoder(), Some(&[0.0; 6])).unwrap(), None);
    }

    #[test]
    fn test_servo_is_resent_until_replaced() {
        let mut target = CommandTarget::default();
        target.set_servo(vec![0.1; 6]);

        let first = target.plan(&encoder(), None).unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Servo);
        assert!(first.frame.keepalive());
        assert!(target.commit(&first));

        // 提交后仍是伺服目标
        let second = target.plan(&encoder(), None).unwrap().unwrap();
        assert_eq!(second.frame, first.frame);
    }

    #[test]
    fn test_stop_is_sent_once() {
        let mut target = CommandTarget::default();
        target.set_servo(vec![0.1; 6]);
        target.set_stop();

        let planned = target.plan(&encoder(), None).unwrap().unwrap();
        assert_eq!(planned.kind, FrameKind::Stop);
        assert!(!planned.frame.keepalive());
        assert_eq!(planned.frame.control_word().0, 0);

        assert!(target.commit(&planned));
        assert_eq!(target.motion, Motion::Idle);
        assert_eq!(target.plan(&encoder(), None).unwrap(), None);
    }

    #[test]
    fn test_commit_skipped_after_concurrent_write() {
        let mut target = CommandTarget::default();
        target.set_stop();
        let planned = target.plan(&encoder(), None).unwrap().unwrap();

        target.set_servo(vec![0.2; 6]);
        assert!(!target.commit(&planned));
        assert!(matches!(target.motion, Motion::Servo(_)));
    }

    #[test]
    fn test_outputs_ride_on_servo_frame() {
        let mut target = CommandTarget::default();
        target.set_servo(vec![0.0; 6]);
        target.set_output(3, PortStatus::Set);

        let planned = target.plan(&encoder(), None).unwrap().unwrap();
        assert!(planned.carries_outputs);
        let outputs = planned.frame.control_word().outputs().unwrap();
        assert!(outputs.is_set(3));

        assert!(target.commit(&planned));
        assert!(!target.outputs_dirty);
        let next = target.plan(&encoder(), None).unwrap().unwrap();
        assert_eq!(next.frame.control_word().outputs(), None);
    }

    #[test]
    fn test_idle_outputs_use_hold_frame() {
        let mut target = CommandTarget::default();
        target.set_output(0, PortStatus::Set);

        // 没有实际位置时无法保持，不发送
        assert_eq!(target.plan(&encoder(), None).unwrap(), None);

        let hold = [0.5; 6];
        let planned = target.plan(&encoder(), Some(&hold)).unwrap().unwrap();
        assert_eq!(planned.kind, FrameKind::Hold);
        assert!(planned.frame.keepalive());
    }

    #[test]
    fn test_overwrite_detection() {
        let mut target = CommandTarget::default();
        assert!(!target.set_servo(vec![0.1; 6]));
        // 控制循环尚未读到第一个目标
        assert!(target.set_servo(vec![0.2; 6]));

        target.observed = true;
        assert!(!target.set_servo(vec![0.3; 6]));
    }

    #[test]
    fn test_invalid_servo_target_fails_to_plan() {
        let mut target = CommandTarget::default();
        target.set_servo(vec![0.1; 3]);
        assert!(matches!(
            target.plan(&encoder(), None),
            Err(EncodeError::LengthMismatch { expected: 6, actual: 3 })
        ));
    }
}
