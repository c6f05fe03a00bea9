//! 命令共用的辅助函数

use anyhow::{Context, Result};
use cobot_driver::{DriverConfig, RobotDriver};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 等待第一个状态报文的时间
pub const STATE_TIMEOUT: Duration = Duration::from_secs(3);

/// 加载配置：文件（可选）+ 命令行覆盖
pub fn load_config(path: Option<&Path>, host: Option<&str>) -> Result<DriverConfig> {
    let mut config = match path {
        Some(path) => DriverConfig::from_file(path)
            .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
        None => DriverConfig::default(),
    };

    if let Some(host) = host {
        config.host_address = host.to_string();
    }
    config.validate().context("配置无效")?;
    Ok(config)
}

/// 注册 Ctrl-C 处理，返回运行标志
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n收到中断信号，正在退出...");
        flag.store(false, Ordering::SeqCst);
    })
    .context("注册 Ctrl-C 处理失败")?;
    Ok(running)
}

/// 创建驱动并连接控制器
pub fn connect(config: DriverConfig) -> Result<RobotDriver> {
    let driver = RobotDriver::new();
    driver.setup(config)?;

    println!("🔌 连接到控制器 {} ...", driver.robot_url());
    driver.start().context("连接控制器失败")?;
    if let Some(addr) = driver.reverse_channel_addr() {
        println!("⏳ 等待控制器回连命令通道 {}", addr);
    }
    Ok(driver)
}

/// 请求停止流式伺服，并等待停止帧真正写入反向通道
///
/// 只看停止帧计数：停止请求之前仍在发送的伺服帧不算数。
pub fn send_stop_frame(driver: &RobotDriver, timeout: Duration) -> Result<bool> {
    let baseline = driver.metrics().stop_frames_sent;
    driver.stop_servo()?;

    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if driver.metrics().stop_frames_sent > baseline {
            return Ok(true);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(false)
}

/// 格式化关节位置（弧度 + 角度）
pub fn format_joints(q: &[f64]) -> String {
    q.iter()
        .enumerate()
        .map(|(i, v)| format!("J{}: {:+.3} ({:+.1}°)", i + 1, v, v.to_degrees()))
        .collect::<Vec<_>>()
        .join("  ")
}
