//! # Cobot CLI
//!
//! Command-line interface for arm robot controllers.
//!
//! ```bash
//! # 监控状态（Ctrl-C 退出）
//! cobot-cli --host 192.168.1.10 monitor --frequency 5
//!
//! # 流式伺服到目标位置 2 秒，然后发送停止帧
//! cobot-cli --config robot.toml move --joints 0,-1.57,1.57,0,0,0 --duration 2
//!
//! # 停止流式伺服
//! cobot-cli stop
//!
//! # 在本机运行模拟控制器
//! cobot-cli sim --port 30003 --reverse 127.0.0.1:50001
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod utils;
mod validation;

use commands::{MonitorCommand, MoveCommand, SimCommand, StopCommand};

const DEFAULT_LOG_FILTER: &str = "cobot_cli=info,cobot_driver=info";

/// Cobot CLI - 机械臂控制器命令行工具
#[derive(Parser, Debug)]
#[command(name = "cobot-cli")]
#[command(about = "Command-line interface for arm robot controllers", long_about = None)]
#[command(version)]
struct Cli {
    /// 驱动配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 控制器地址（覆盖配置文件）
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 监控机器人状态
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 流式伺服到目标关节位置
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 停止流式伺服（发送 keepalive = 0）
    Stop {
        #[command(flatten)]
        args: StopCommand,
    },

    /// 运行模拟控制器
    Sim {
        #[command(flatten)]
        args: SimCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sim { args } => args.execute(),
        Commands::Monitor { args } => {
            let config = utils::load_config(cli.config.as_deref(), cli.host.as_deref())?;
            args.execute(config)
        },
        Commands::Move { args } => {
            let config = utils::load_config(cli.config.as_deref(), cli.host.as_deref())?;
            args.execute(config)
        },
        Commands::Stop { args } => {
            let config = utils::load_config(cli.config.as_deref(), cli.host.as_deref())?;
            args.execute(config)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["cobot-cli", "stop", "--host", "10.0.0.2"]).unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.2"));
        assert!(matches!(cli.command, Commands::Stop { .. }));
    }

    #[test]
    fn test_move_requires_joints() {
        assert!(Cli::try_parse_from(["cobot-cli", "move"]).is_err());
    }
}
