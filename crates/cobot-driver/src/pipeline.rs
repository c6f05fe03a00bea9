//! 控制循环与报文读取线程
//!
//! 两个后台线程：
//!
//! - **读取线程**（`telegram_loop`）：阻塞读状态通道，按长度前缀切出完整报文，
//!   通过有界队列交给控制循环。每条连接一个读取线程，连接代际（generation）随报文一起传递。
//! - **控制循环**（`control_loop`）：唯一的报文消费者。每收到一个报文，严格按顺序执行：
//!   1. 解码并发布最新状态（ArcSwap）
//!   2. 向观察者分发（不持有任何锁）
//!   3. `try_lock` 读取命令目标，最多发送一帧命令
//!
//! 控制循环本身从不阻塞在锁上：命令目标或连接管理器被占用时，
//! 本周期沿用缓存的目标或跳过发送，并记入 `stale_cycles`。

use crate::command::{CommandTarget, FrameKind, PlannedFrame};
use crate::metrics::DriverMetrics;
use crate::slot::CachedReader;
use crate::state::DriverContext;
use crate::watchdog::LinkWatchdog;
use cobot_net::{NetError, SendOutcome, TelegramSource};
use cobot_protocol::{CommandEncoder, RobotState, TelegramDecoder};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

/// 控制循环事件
#[derive(Debug)]
pub enum LoopEvent {
    /// 一个完整报文（含长度前缀）
    Telegram { generation: u64, bytes: Vec<u8> },
    /// 链路建立（由连接管理器通知）
    LinkUp { generation: u64 },
    /// 链路断开（由连接管理器通知）
    LinkDown { generation: u64 },
    /// 停止控制循环
    Shutdown,
}

/// 控制循环参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub joint_count: usize,
    /// 报文中断判定时间
    pub watchdog_timeout: Duration,
}

/// 控制循环的单线程状态
///
/// 由 `control_loop` 驱动，每个事件调用一次 `handle`。
pub struct ControlCycle {
    ctx: Arc<DriverContext>,
    decoder: TelegramDecoder,
    encoder: CommandEncoder,
    target: CachedReader<CommandTarget>,
    watchdog: LinkWatchdog,
    /// 已向观察者发出 `on_connect` 的连接代际
    notified: Option<u64>,
    /// 发送失败、尚未从共享插槽中清除的目标序号
    pending_discard: Option<u64>,
}

impl ControlCycle {
    pub fn new(ctx: Arc<DriverContext>, config: LoopConfig) -> Self {
        Self {
            ctx,
            decoder: TelegramDecoder::new(config.joint_count),
            encoder: CommandEncoder::new(config.joint_count),
            target: CachedReader::new(CommandTarget::default()),
            watchdog: LinkWatchdog::new(config.watchdog_timeout),
            notified: None,
            pending_discard: None,
        }
    }

    pub fn watchdog_timeout(&self) -> Duration {
        self.watchdog.timeout()
    }

    /// 处理一个事件（`None` 表示等待超时）
    ///
    /// 返回 false 表示应退出循环。
    pub fn handle(&mut self, event: Option<LoopEvent>) -> bool {
        self.retry_discard();
        self.sync_link();
        match event {
            Some(LoopEvent::Telegram { generation, bytes }) => self.on_telegram(generation, &bytes),
            Some(LoopEvent::LinkUp { generation }) | Some(LoopEvent::LinkDown { generation }) => {
                trace!("Control loop: link event (generation {})", generation);
                self.watchdog.reset(Instant::now());
            },
            Some(LoopEvent::Shutdown) => return false,
            None => self.check_watchdog(),
        }
        true
    }

    /// 循环退出：仍处于已通知的连接时补发 `on_disconnect`
    pub fn finish(&mut self) {
        if let Some(generation) = self.notified.take() {
            trace!("Control loop: closing observers for generation {}", generation);
            self.ctx.observers.notify_disconnect();
        }
    }

    /// 对齐观察者看到的链路边沿
    ///
    /// 以链路状态的代际为准：每条连接恰好一次 `on_connect`，恰好一次 `on_disconnect`。
    fn sync_link(&mut self) {
        let current = self.ctx.link.connected_generation();
        if current == self.notified {
            return;
        }
        if let Some(previous) = self.notified.take() {
            info!("Link down (generation {})", previous);
            self.ctx.observers.notify_disconnect();
        }
        if let Some(generation) = current {
            info!("Link up (generation {})", generation);
            self.watchdog.reset(Instant::now());
            self.ctx.observers.notify_connect();
        }
        self.notified = current;
    }

    fn on_telegram(&mut self, generation: u64, bytes: &[u8]) {
        // 旧连接残留的报文（或链路已断开）直接丢弃
        if self.notified != Some(generation) {
            trace!("Discarding telegram from generation {}", generation);
            return;
        }
        if self.watchdog.feed(Instant::now()) {
            info!("Telegram stream resumed");
        }

        let state = match self.decoder.decode(bytes) {
            Ok(state) => Arc::new(state),
            Err(e) => {
                DriverMetrics::incr(&self.ctx.metrics.decode_errors);
                warn!("Dropping malformed telegram ({} bytes): {}", bytes.len(), e);
                return;
            },
        };
        DriverMetrics::incr(&self.ctx.metrics.telegrams_decoded);

        self.ctx.robot_state.store(Some(state.clone()));
        self.ctx.observers.notify_state(&state);

        self.send_target(&state);
    }

    fn send_target(&mut self, state: &RobotState) {
        let metrics = &self.ctx.metrics;

        let (target, fresh) = self.target.read(&self.ctx.target, |t| t.observed = true);
        if !fresh {
            DriverMetrics::incr(&metrics.stale_cycles);
            trace!("Command target busy, reusing cached target");
        }
        if self.pending_discard == Some(target.seq) {
            trace!("Command target awaiting discard, not sent");
            return;
        }

        let planned = match target.plan(&self.encoder, Some(&state.q_actual)) {
            Ok(Some(planned)) => planned,
            Ok(None) => return,
            Err(e) => {
                warn!("Skipping command that cannot be encoded: {}", e);
                return;
            },
        };

        let Some(mut manager) = self.ctx.manager.try_lock() else {
            DriverMetrics::incr(&metrics.stale_cycles);
            trace!("Connection manager busy, skipping send this cycle");
            return;
        };
        let result = manager.send_command(planned.frame.as_bytes());
        drop(manager);

        match result {
            Ok(SendOutcome::Sent) => {
                DriverMetrics::incr(&metrics.frames_sent);
                if planned.kind == FrameKind::Stop {
                    DriverMetrics::incr(&metrics.stop_frames_sent);
                }
                self.commit(&planned);
            },
            Ok(SendOutcome::NoReverseChannel) => {
                DriverMetrics::incr(&metrics.sends_skipped);
                trace!("Reverse channel not established, command not sent");
            },
            Ok(SendOutcome::NotConnected) => {
                DriverMetrics::incr(&metrics.sends_skipped);
            },
            Err(e) => {
                DriverMetrics::incr(&metrics.send_errors);
                error!("Command send failed, link is down: {}", e);
                self.discard(&planned);
                self.sync_link();
            },
        }
    }

    /// 发送成功：推进缓存与共享目标（Stop 回到 Idle、清除输出待发标记）
    fn commit(&mut self, planned: &PlannedFrame) {
        self.target.last_mut().commit(planned);
        if self.ctx.target.try_update(|t| t.commit(planned)).is_none() {
            // 下一周期重新读取时再对齐
            trace!("Command target busy, commit deferred");
        }
    }

    /// 发送失败：丢弃失败的目标，链路恢复后不会被重放
    ///
    /// 调用方在此期间写入的新目标（序号已变化）保留。
    /// 插槽被占用时记下序号，之后每个事件重试一次，期间该目标不会被发送。
    fn discard(&mut self, planned: &PlannedFrame) {
        self.target.last_mut().clear();
        self.pending_discard = Some(planned.seq);
        self.retry_discard();
    }

    fn retry_discard(&mut self) {
        let Some(seq) = self.pending_discard else {
            return;
        };
        let cleared = self.ctx.target.try_update(|t| {
            if t.seq == seq {
                t.clear();
            }
        });
        if cleared.is_some() {
            self.pending_discard = None;
        } else {
            trace!("Command target busy, discard deferred");
        }
    }

    fn check_watchdog(&mut self) {
        if self.notified.is_none() {
            return;
        }
        let now = Instant::now();
        if self.watchdog.check(now) {
            DriverMetrics::incr(&self.ctx.metrics.link_stalls);
            warn!(
                "No telegram for {:?} (timeout {:?}), link stalled",
                self.watchdog.silence(now),
                self.watchdog.timeout()
            );
        }
    }
}

/// 控制循环
///
/// # 参数
/// - `events`: 事件队列接收端（报文 + 链路事件）
/// - `ctx`: 共享上下文
/// - `config`: 关节数与看门狗超时
/// - `is_running`: 运行标志，为 false 时退出
pub fn control_loop(events: Receiver<LoopEvent>, ctx: Arc<DriverContext>, config: LoopConfig, is_running: Arc<AtomicBool>) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Control thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set control thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    let mut cycle = ControlCycle::new(ctx, config);

    loop {
        // Acquire: 看到 false 时必须同时看到 stop() 之前的清理写入
        if !is_running.load(Ordering::Acquire) {
            trace!("Control loop: is_running flag is false, exiting");
            break;
        }

        let event = match events.recv_timeout(cycle.watchdog_timeout()) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Control loop: event channel disconnected");
                break;
            },
        };

        if !cycle.handle(event) {
            trace!("Control loop: shutdown requested");
            break;
        }
    }

    cycle.finish();
    trace!("Control loop: exited");
}

/// 报文读取线程
///
/// 读超时只用于检查运行标志和连接代际；其他读错误（对端关闭、长度字段非法、I/O 错误）
/// 都视为状态通道丢失，通知连接管理器后退出。重连由调用方显式发起，本线程不重试。
pub fn telegram_loop(
    mut source: impl TelegramSource,
    generation: u64,
    events: Sender<LoopEvent>,
    ctx: Arc<DriverContext>,
    is_running: Arc<AtomicBool>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Reader thread: is_running flag is false, exiting");
            break;
        }

        match source.receive() {
            Ok(bytes) => {
                DriverMetrics::incr(&ctx.metrics.telegrams_received);
                match events.try_send(LoopEvent::Telegram { generation, bytes }) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        DriverMetrics::incr(&ctx.metrics.telegrams_dropped);
                        warn!("Event queue full, dropping telegram");
                    },
                    Err(TrySendError::Disconnected(_)) => {
                        trace!("Reader thread: event channel disconnected");
                        break;
                    },
                }
            },
            Err(NetError::Timeout) => {
                if ctx.link.generation() != generation {
                    trace!("Reader thread: generation {} superseded", generation);
                    break;
                }
            },
            Err(e) => {
                if ctx.link.connected_generation() == Some(generation) {
                    error!("Reader thread: state channel read failed: {}", e);
                }
                ctx.manager.lock().mark_lost(generation);
                break;
            },
        }
    }

    trace!("Reader thread: loop exited (generation {})", generation);
}
