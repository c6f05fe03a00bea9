//! 移动命令
//!
//! 在给定时长内持续流式发送同一个伺服目标（每个状态报文一帧），然后发送停止帧。

use crate::utils::{self, STATE_TIMEOUT, format_joints};
use crate::validation::JointValidator;
use anyhow::{Context, Result};
use clap::Args;
use cobot_driver::DriverConfig;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 目标关节位置（弧度），逗号分隔
    /// 例如：0,-1.57,1.57,0,0,0
    #[arg(short, long, allow_hyphen_values = true)]
    pub joints: String,

    /// 流式发送时长（秒）
    #[arg(short, long, default_value_t = 2.0)]
    pub duration: f64,
}

impl MoveCommand {
    /// 解析并验证关节位置
    pub fn parse_joints(&self, joint_count: usize) -> Result<Vec<f64>> {
        JointValidator::default_range().parse_joints(&self.joints, joint_count)
    }

    pub fn execute(&self, config: DriverConfig) -> Result<()> {
        let target = self.parse_joints(config.joint_count)?;
        if !(self.duration.is_finite() && self.duration > 0.0) {
            anyhow::bail!("时长必须为正数，得到 {}", self.duration);
        }

        let running = utils::install_shutdown_flag()?;
        let driver = utils::connect(config)?;
        let state = driver.wait_for_state(STATE_TIMEOUT).context("未收到控制器状态报文")?;
        println!("📍 当前位置  {}", format_joints(&state.q_actual));
        println!("🎯 目标位置  {}", format_joints(&target));

        driver.move_joints(&target)?;

        let duration = Duration::from_secs_f64(self.duration);
        let start = Instant::now();
        while running.load(Ordering::SeqCst) && start.elapsed() < duration {
            thread::sleep(Duration::from_millis(50));
        }

        let stopped = utils::send_stop_frame(&driver, Duration::from_secs(1))?;
        let metrics = driver.metrics();
        let final_state = driver.latest_state();
        driver.stop();

        if metrics.frames_sent == 0 {
            anyhow::bail!("控制器未回连命令通道，未发送任何命令");
        }
        if let Some(state) = final_state {
            println!("📍 结束位置  {}", format_joints(&state.q_actual));
        }
        if !stopped {
            anyhow::bail!("已发送 {} 帧命令，但停止帧未确认发送", metrics.frames_sent);
        }
        println!("✅ 已发送 {} 帧命令，停止帧已发送", metrics.frames_sent);
        Ok(())
    }
}
