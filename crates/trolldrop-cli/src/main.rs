//! Trolldrop CLI
//!
//! 命令行前端：加载设置、初始化日志，并在模拟传输上运行活动。
//!
//! # 日志
//!
//! 默认级别来自设置文件，设置了 RUST_LOG 时以 RUST_LOG 为准：
//!
//! ```bash
//! RUST_LOG=debug trolldrop simulate --peers Alice,Bob --target Alice
//! ```

mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use trolldrop_core::{LogLevel, MAX_RECHARGE, TrollSettings};

#[derive(Parser)]
#[command(name = "trolldrop", version, about = "向附近设备反复发送文件请求")]
struct Cli {
    /// 日志级别 (覆盖设置文件)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// 详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 在模拟传输上运行一次活动
    Simulate(simulate::SimulateArgs),
    /// 查看或修改设置
    Config {
        /// 冷却时长 (秒, 0 - 3.5)
        #[arg(short, long, value_parser = parse_recharge)]
        recharge: Option<Duration>,
        /// 默认发送的文件
        #[arg(short, long)]
        payload: Option<PathBuf>,
        /// 默认日志级别
        #[arg(long = "default-log-level")]
        default_log_level: Option<LogLevel>,
    },
}

/// 解析冷却时长参数
pub(crate) fn parse_recharge(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid number: {e}"))?;
    if !(0.0..=MAX_RECHARGE.as_secs_f64()).contains(&secs) {
        return Err(format!(
            "recharge must be between 0 and {:.1} seconds",
            MAX_RECHARGE.as_secs_f64()
        ));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = TrollSettings::load();
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    settings.verbose |= cli.verbose;
    init_logging(&settings);

    match cli.command {
        Commands::Simulate(args) => simulate::run(args, &settings).await?,
        Commands::Config {
            recharge,
            payload,
            default_log_level,
        } => {
            if recharge.is_none() && payload.is_none() && default_log_level.is_none() {
                println!("📄 {}", TrollSettings::config_path().display());
                println!("   冷却时长: {:.1}s", settings.recharge_duration().as_secs_f64());
                match &settings.payload {
                    Some(p) => println!("   发送文件: {}", p.display()),
                    None => println!("   发送文件: (未设置)"),
                }
                println!("   日志级别: {} {}", settings.log_level.icon(), settings.log_level);
                return Ok(());
            }

            // 重新加载，避免把命令行的临时覆盖写回文件
            let mut stored = TrollSettings::load();
            if let Some(recharge) = recharge {
                stored.recharge_secs = recharge.as_secs_f64();
            }
            if let Some(payload) = payload {
                stored.payload = Some(payload);
            }
            if let Some(level) = default_log_level {
                stored.log_level = level;
            }
            stored.save()?;
            println!("✅ 设置已保存");
        }
    }

    Ok(())
}

/// 初始化日志系统
fn init_logging(settings: &TrollSettings) {
    // 桥接 log crate（trolldrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive(settings.verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
