//! 驱动性能指标
//!
//! 全部为 `Relaxed` 原子计数器，热路径上只有一次 `fetch_add`。

use std::sync::atomic::{AtomicU64, Ordering};

/// 驱动指标（原子计数器）
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// 读取线程收到的报文总数
    pub telegrams_received: AtomicU64,
    /// 成功解码并发布的报文
    pub telegrams_decoded: AtomicU64,
    /// 事件队列满而被丢弃的报文
    pub telegrams_dropped: AtomicU64,
    /// 解码失败的报文
    pub decode_errors: AtomicU64,
    /// 已写入反向通道的命令帧
    pub frames_sent: AtomicU64,
    /// 已写入反向通道的停止帧（keepalive = 0）
    pub stop_frames_sent: AtomicU64,
    /// 命令帧写入失败次数
    pub send_errors: AtomicU64,
    /// 因反向通道未建立而跳过的周期
    pub sends_skipped: AtomicU64,
    /// 尚未被控制循环读到就被覆盖的伺服目标
    pub target_overwrites: AtomicU64,
    /// `try_lock` 失败、沿用上一周期值的次数
    pub stale_cycles: AtomicU64,
    /// 看门狗检测到的报文中断次数
    pub link_stalls: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取当前指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            telegrams_received: self.telegrams_received.load(Ordering::Relaxed),
            telegrams_decoded: self.telegrams_decoded.load(Ordering::Relaxed),
            telegrams_dropped: self.telegrams_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            stop_frames_sent: self.stop_frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            sends_skipped: self.sends_skipped.load(Ordering::Relaxed),
            target_overwrites: self.target_overwrites.load(Ordering::Relaxed),
            stale_cycles: self.stale_cycles.load(Ordering::Relaxed),
            link_stalls: self.link_stalls.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器（每次 `start()` 调用）
    pub fn reset(&self) {
        for counter in [
            &self.telegrams_received,
            &self.telegrams_decoded,
            &self.telegrams_dropped,
            &self.decode_errors,
            &self.frames_sent,
            &self.stop_frames_sent,
            &self.send_errors,
            &self.sends_skipped,
            &self.target_overwrites,
            &self.stale_cycles,
            &self.link_stalls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub telegrams_received: u64,
    pub telegrams_decoded: u64,
    pub telegrams_dropped: u64,
    pub decode_errors: u64,
    pub frames_sent: u64,
    pub stop_frames_sent: u64,
    pub send_errors: u64,
    pub sends_skipped: u64,
    pub target_overwrites: u64,
    pub stale_cycles: u64,
    pub link_stalls: u64,
}

impl MetricsSnapshot {
    /// 报文丢弃率（百分比，含解码失败）
    pub fn telegram_loss_rate(&self) -> f64 {
        if self.telegrams_received == 0 {
            return 0.0;
        }
        (self.telegrams_dropped + self.decode_errors) as f64 / self.telegrams_received as f64 * 100.0
    }
}
