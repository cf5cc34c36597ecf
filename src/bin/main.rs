use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vbwatch_chain::{ChainStateManager, StatusReport};
use vbwatch_core::{MonitorConfig, MonitorSettings, Network, VersionBitsMonitor, WarningState};

#[derive(Parser)]
#[command(name = "vbwatch")]
#[command(about = "Unknown version-bits rules warning monitor", long_about = None)]
struct Cli {
    #[command(flatten)]
    node: NodeArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct NodeArgs {
    /// Data directory holding blocks.json
    #[arg(long, global = true, default_value = ".vbwatch")]
    datadir: PathBuf,

    /// main, test or regtest (overrides the config file)
    #[arg(long, global = true)]
    network: Option<Network>,

    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mine blocks on top of the active tip
    Mine {
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Block version, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_version, default_value = "0x20000000")]
        version: u32,
    },

    /// Replace the top `depth` blocks with a longer branch of `count` blocks
    Reorg {
        #[arg(long)]
        depth: u64,

        #[arg(long)]
        count: usize,

        /// Block version, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_version, default_value = "0x20000000")]
        version: u32,
    },

    /// Print node, mining and network status
    Status,

    /// Follow the block store and report warning changes until Ctrl-C
    Follow {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(Serialize)]
struct ChangeSummary {
    height: u64,
    tip: String,
    state: WarningState,
}

fn parse_version(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid block version '{}': {}", raw, e))
}

fn load_config(args: &NodeArgs) -> Result<MonitorConfig> {
    let mut settings = MonitorSettings::load(args.config.as_deref()).context("Failed to load settings")?;
    if args.network.is_some() {
        settings = settings.overlay(MonitorSettings {
            network: args.network,
            ..MonitorSettings::default()
        });
    }
    MonitorConfig::from_settings(&settings).context("Invalid monitor configuration")
}

fn open_manager(args: &NodeArgs) -> Result<ChainStateManager> {
    let config = load_config(args)?;
    let monitor = VersionBitsMonitor::new(config).context("Failed to start version bits monitor")?;
    ChainStateManager::open(&args.datadir, Arc::new(monitor))
        .with_context(|| format!("Failed to open chain in {}", args.datadir.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn summary(manager: &ChainStateManager, state: WarningState) -> ChangeSummary {
    let tip = manager.tip();
    ChangeSummary {
        height: tip.height,
        tip: tip.hash,
        state,
    }
}

async fn follow(manager: ChainStateManager, interval_ms: u64) -> Result<()> {
    let status = manager.status_service();
    let mut last: StatusReport = status.get_all();
    print_json(&last)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.sync_from_store() {
                    Ok(Some(_)) => {
                        let report = status.get_all();
                        if report.node.errors != last.node.errors {
                            print_json(&report)?;
                        }
                        last = report;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to sync from block store: {}", e),
                }
            }
            _ = &mut ctrl_c => {
                info!("Stopping at height {}", manager.height());
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let manager = open_manager(&cli.node)?;

    match cli.command {
        Commands::Mine { count, version } => {
            let state = manager.mine(count, version).context("Mining failed")?;
            print_json(&summary(&manager, state))?;
        }
        Commands::Reorg { depth, count, version } => {
            let fork = manager.height().saturating_sub(depth);
            let branch = manager
                .build_branch(fork, count, version)
                .context("Failed to build branch")?;
            let state = manager.reorganize(branch).context("Reorganization failed")?;
            print_json(&summary(&manager, state))?;
        }
        Commands::Status => {
            print_json(&manager.status_service().get_all())?;
        }
        Commands::Follow { interval_ms } => {
            follow(manager, interval_ms).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbwatch_core::VERSIONBITS_TOP_BITS;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0x28000000"), Ok(0x2800_0000));
        assert_eq!(parse_version("536870912"), Ok(VERSIONBITS_TOP_BITS));
        assert!(parse_version("0xZZ").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "vbwatch",
            "reorg",
            "--depth",
            "10",
            "--count",
            "40",
            "--version",
            "0x28000000",
            "--network",
            "regtest",
            "--datadir",
            "/tmp/vb",
        ])
        .unwrap();

        assert_eq!(cli.node.network, Some(Network::Regtest));
        assert_eq!(cli.node.datadir, PathBuf::from("/tmp/vb"));
        match cli.command {
            Commands::Reorg { depth, count, version } => {
                assert_eq!((depth, count, version), (10, 40, 0x2800_0000));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_mine_defaults_to_plain_version() {
        let cli = Cli::try_parse_from(["vbwatch", "mine"]).unwrap();
        match cli.command {
            Commands::Mine { count, version } => {
                assert_eq!(count, 1);
                assert_eq!(version, VERSIONBITS_TOP_BITS);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
