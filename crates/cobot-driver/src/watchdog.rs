//! 报文看门狗
//!
//! 控制器按固定周期广播报文。链路已连接但超过超时时间没有报文时，
//! 看门狗报告一次中断（同一段静默只报告一次），由控制循环记录日志和计数。
//! 看门狗不会拆除链路：重连始终由调用方显式发起。

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LinkWatchdog {
    timeout: Duration,
    last_feed: Instant,
    stalled: bool,
}

impl LinkWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Instant::now(),
            stalled: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 收到报文
    ///
    /// 返回之前是否处于中断状态（用于记录恢复日志）。
    pub fn feed(&mut self, now: Instant) -> bool {
        self.last_feed = now;
        std::mem::replace(&mut self.stalled, false)
    }

    /// 链路状态变化时重新计时
    pub fn reset(&mut self, now: Instant) {
        self.last_feed = now;
        self.stalled = false;
    }

    /// 检查是否刚刚进入中断状态（每段静默只返回一次 true）
    pub fn check(&mut self, now: Instant) -> bool {
        if self.stalled || now.saturating_duration_since(self.last_feed) < self.timeout {
            return false;
        }
        self.stalled = true;
        true
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_feed)
    }
}
