//! 监控命令
//!
//! 以限定频率打印最新状态，直到 Ctrl-C。

use crate::utils::{self, format_joints};
use anyhow::Result;
use clap::Args;
use cobot_driver::{ConnectionState, DriverConfig, RobotState, StateObserver};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 打印频率（Hz）
    #[arg(short, long, default_value_t = 10)]
    pub frequency: u32,

    /// 链路断开后自动调用 reconnect（每秒最多一次）
    #[arg(long)]
    pub reconnect: bool,
}

/// 链路事件打印 + 报文计数
#[derive(Default)]
struct LinkReporter {
    updates: AtomicU64,
}

impl StateObserver for LinkReporter {
    fn on_state_update(&self, _state: &Arc<RobotState>) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn on_connect(&self) {
        println!("✅ 链路已建立");
    }

    fn on_disconnect(&self) {
        println!("⚠️  链路已断开");
    }
}

impl MonitorCommand {
    pub fn execute(&self, config: DriverConfig) -> Result<()> {
        if self.frequency == 0 {
            anyhow::bail!("频率必须大于 0");
        }
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.frequency));

        let running = utils::install_shutdown_flag()?;
        let driver = utils::connect(config)?;
        let reporter = Arc::new(LinkReporter::default());
        driver.attach(reporter.clone());

        println!("📊 监控中（Ctrl-C 退出）");
        let mut last_rate_check = (Instant::now(), 0u64);
        let mut last_reconnect = Instant::now();

        while running.load(Ordering::SeqCst) {
            thread::sleep(interval);

            if driver.connection_state() != ConnectionState::Connected {
                if self.reconnect && last_reconnect.elapsed() >= Duration::from_secs(1) {
                    last_reconnect = Instant::now();
                    if let Err(e) = driver.reconnect() {
                        warn!("Reconnect failed: {}", e);
                    }
                }
                continue;
            }

            let Some(state) = driver.latest_state() else {
                continue;
            };

            let (since, count) = last_rate_check;
            let updates = reporter.updates.load(Ordering::Relaxed);
            let elapsed = since.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                (updates - count) as f64 / elapsed
            } else {
                0.0
            };
            last_rate_check = (Instant::now(), updates);

            println!(
                "[{:>9.3}s v{} {:>6.1} Hz] {}  DI={:#018x} DO={:#04x}",
                state.timestamp_s,
                state.version,
                rate,
                format_joints(&state.q_actual),
                state.digital_inputs.bits(),
                state.digital_outputs.bits()
            );
        }

        driver.stop();
        let metrics = driver.metrics();
        println!(
            "📈 报文 {} 条（解码失败 {}，丢弃 {}），丢失率 {:.2}%",
            metrics.telegrams_received,
            metrics.decode_errors,
            metrics.telegrams_dropped,
            metrics.telegram_loss_rate()
        );
        Ok(())
    }
}
