//! 模拟控制器命令
//!
//! 在本机运行一个模拟控制器：驱动连上状态端口后，回连 `--reverse` 地址作为命令通道。

use crate::utils;
use anyhow::{Context, Result};
use clap::Args;
use cobot_net::{SimConfig, SimulatedController};
use cobot_protocol::{DEFAULT_STATE_PORT, MAX_JOINT_COUNT, ProtocolVersion};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// 模拟控制器参数
#[derive(Args, Debug)]
pub struct SimCommand {
    /// 状态端口
    #[arg(short, long, default_value_t = DEFAULT_STATE_PORT)]
    pub port: u16,

    /// 驱动的命令通道地址（模拟控制器回连）
    #[arg(short, long, default_value = "127.0.0.1:50001")]
    pub reverse: SocketAddr,

    /// 关节数量
    #[arg(short, long, default_value_t = 6)]
    pub joints: usize,

    /// 报文周期（毫秒）
    #[arg(long, default_value_t = 8)]
    pub period_ms: u64,

    /// 报文协议版本（MAJOR.MINOR）
    #[arg(long, default_value = "3.2", value_parser = parse_version)]
    pub protocol: ProtocolVersion,
}

fn parse_version(s: &str) -> Result<ProtocolVersion, String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("expected MAJOR.MINOR, got `{}`", s))?;
    let major = major.parse().map_err(|e| format!("invalid major version: {}", e))?;
    let minor = minor.parse().map_err(|e| format!("invalid minor version: {}", e))?;
    Ok(ProtocolVersion::new(major, minor))
}

impl SimCommand {
    pub fn execute(&self) -> Result<()> {
        if !(1..=MAX_JOINT_COUNT).contains(&self.joints) {
            anyhow::bail!("关节数量必须在 1..={} 之间", MAX_JOINT_COUNT);
        }
        if self.period_ms == 0 {
            anyhow::bail!("报文周期必须大于 0");
        }

        let running = utils::install_shutdown_flag()?;
        let mut sim = SimulatedController::start(SimConfig {
            joint_count: self.joints,
            version: self.protocol,
            period: Some(Duration::from_millis(self.period_ms)),
            state_port: self.port,
            initial_q: vec![0.0; self.joints],
        })
        .with_context(|| format!("无法在端口 {} 启动模拟控制器", self.port))?;

        println!(
            "🤖 模拟控制器已启动：状态端口 {}，{} 关节，协议 {}，周期 {} ms",
            sim.state_addr(),
            self.joints,
            self.protocol,
            self.period_ms
        );

        let mut dialled = false;
        while running.load(Ordering::SeqCst) {
            if !sim.wait_for_client(Duration::from_millis(200)) {
                continue;
            }
            if !dialled {
                // 驱动在状态通道建立后才开始监听，失败时稍后重试
                match sim.connect_reverse(self.reverse) {
                    Ok(()) => {
                        println!("🔁 已回连命令通道 {}", self.reverse);
                        dialled = true;
                    },
                    Err(e) => {
                        debug!("Reverse dial to {} failed: {}", self.reverse, e);
                        thread::sleep(Duration::from_millis(100));
                        continue;
                    },
                }
            }

            thread::sleep(Duration::from_millis(200));
            if !sim.has_client() {
                println!("👋 驱动已断开");
                sim.close_reverse();
                dialled = false;
            }
        }

        sim.shutdown();
        println!(
            "✅ 共发送 {} 个报文，收到 {} 帧命令",
            sim.telegrams_sent(),
            sim.command_count()
        );
        Ok(())
    }
}
