//! # Lap Timer Simulator
//!
//! 在主机上运行计时器核心：合成信号强度驱动过线检测，进程内手机经协议帧
//! 与设备交互，会话历史保存在 JSON 文件中。
//!
//! ```bash
//! # 跑 5 圈，每圈约 62 秒
//! laptimer-sim simulate --laps 5 --lap-ms 62000 --jitter-ms 1500
//!
//! # 查看历史（打印原始帧）
//! laptimer-sim --hex sessions
//! laptimer-sim record 3
//!
//! # 删除全部会话
//! laptimer-sim reset
//! ```
//!
//! 日志级别通过 `RUST_LOG` 调整，默认 `laptimer=info`。

use anyhow::Result;
use clap::{Parser, Subcommand};
use laptimer_protocol::SessionIdRelation;
use std::path::PathBuf;

mod config;
mod signal;
mod sim;

use config::SimulatorConfig;
use sim::{Simulator, format_lap};

/// Lap Timer 主机仿真器
#[derive(Parser, Debug)]
#[command(name = "laptimer-sim")]
#[command(about = "Host simulator for the lap timer core", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Flash 存储文件，覆盖配置中的路径
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// 手机 MTU，覆盖配置中的值
    #[arg(long, global = true)]
    mtu: Option<u16>,

    /// 打印收发的原始帧
    #[arg(long, global = true)]
    hex: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 模拟一次比赛
    Simulate {
        /// 圈数
        #[arg(short, long, default_value_t = 5)]
        laps: u32,

        /// 平均圈时（毫秒）
        #[arg(long, default_value_t = 60_000)]
        lap_ms: u32,

        /// 圈时抖动（毫秒）
        #[arg(long, default_value_t = 2_000)]
        jitter_ms: u32,

        /// 随机种子
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// 列出已保存的会话
    Sessions,

    /// 查看一条会话记录
    Record {
        session_id: u16,

        /// 找不到时取之后最近的会话
        #[arg(long)]
        at_least: bool,
    },

    /// 删除全部会话
    Reset,

    /// 打印生效的配置
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("laptimer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SimulatorConfig::load(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    if let Some(mtu) = cli.mtu {
        config.phone.mtu = mtu;
    }

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut sim = Simulator::open(config, cli.hex)?;
    match cli.command {
        Commands::Simulate {
            laps,
            lap_ms,
            jitter_ms,
            seed,
        } => {
            let summary = sim.race(laps, lap_ms, jitter_ms, seed)?;
            println!(
                "session {}: {} laps, best {}",
                summary.session_id,
                summary.laps.len(),
                summary.best.map(format_lap).unwrap_or_else(|| "-".to_string())
            );
        },

        Commands::Sessions => {
            let ids = sim.sessions()?;
            if ids.is_empty() {
                println!("no sessions");
            }
            for id in ids {
                println!("{}", id);
            }
        },

        Commands::Record {
            session_id,
            at_least,
        } => {
            let relation = if at_least {
                SessionIdRelation::GreaterOrEqualTo
            } else {
                SessionIdRelation::EqualTo
            };
            match sim.record(session_id, relation)? {
                Some(record) => {
                    println!(
                        "session {} ({:?}), {} laps",
                        record.header.session_id, record.header.state, record.header.lap_count
                    );
                    for (i, lap) in record.laps.iter().enumerate() {
                        println!("lap {:>3}  {}", i + 1, format_lap(*lap));
                    }
                },
                None => println!("session {} not found", session_id),
            }
        },

        Commands::Reset => {
            sim.reset()?;
            println!("all sessions deleted");
        },

        Commands::Config => {},
    }

    Ok(())
}
