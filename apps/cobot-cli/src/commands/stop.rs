//! 停止命令
//!
//! 连接控制器，在下一个状态报文周期发送一帧 keepalive = 0 的停止帧。

use crate::utils::{self, STATE_TIMEOUT};
use anyhow::{Context, Result};
use clap::Args;
use cobot_driver::DriverConfig;
use std::time::Duration;

/// 停止命令参数
#[derive(Args, Debug)]
pub struct StopCommand {
    /// 等待控制器回连并发送停止帧的时间（秒）
    #[arg(short, long, default_value_t = 2.0)]
    pub timeout: f64,
}

impl StopCommand {
    pub fn execute(&self, config: DriverConfig) -> Result<()> {
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            anyhow::bail!("超时必须为正数，得到 {}", self.timeout);
        }

        let driver = utils::connect(config)?;
        driver.wait_for_state(STATE_TIMEOUT).context("未收到控制器状态报文")?;

        println!("🛑 发送停止帧...");
        let sent = utils::send_stop_frame(&driver, Duration::from_secs_f64(self.timeout))?;
        driver.stop();

        if !sent {
            anyhow::bail!("控制器未回连命令通道，停止帧未发送");
        }
        println!("✅ 停止帧已发送");
        Ok(())
    }
}
