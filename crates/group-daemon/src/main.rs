//! group-daemon: one member of a self-organizing server group.
//!
//! Joins the group through the persisted leader (or founds it), runs the
//! failure detector and serves membership and cache traffic until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use group_core::cache::Caches;
use group_core::config::GroupConfig;
use group_core::leader::{FileLeaderStore, LeaderStore, MemoryLeaderStore};
use group_daemon::GroupNode;

#[derive(Parser, Debug)]
#[command(name = "group-daemon")]
#[command(about = "Group membership daemon")]
struct Args {
    /// Own address as ipv4:port; peers reach this process here
    #[arg(short, long)]
    address: String,

    /// Seconds between failure-detector rounds (0 selects the default)
    #[arg(long, default_value_t = 5)]
    ping_cycle: u64,

    /// Suspicion count at which a process is declared failed (0 selects the default)
    #[arg(long, default_value_t = 30)]
    failure_threshold: u64,

    /// JSON file holding the current leader, shared by processes on this host
    #[arg(long)]
    leader_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,group_daemon=debug"
    } else {
        "info,group_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting group-daemon");
    info!("Address: {}", args.address);

    let config = GroupConfig::new(args.address)
        .with_ping_cycle(Duration::from_secs(args.ping_cycle))
        .with_failure_threshold(args.failure_threshold);
    config.validate()?;

    let store: Arc<dyn LeaderStore> = match &args.leader_file {
        Some(path) => {
            info!("Leader file: {:?}", path);
            Arc::new(FileLeaderStore::new(path))
        }
        None => {
            info!("Using in-memory leader store");
            Arc::new(MemoryLeaderStore::new())
        }
    };

    let mut node = GroupNode::start(config, store, Caches::new()).await?;
    info!("Daemon running. Press Ctrl+C to stop.");

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        err = node.fatal() => err,
    };

    match fatal {
        Some(e) => {
            error!("Fatal group error: {}", e);
            Err(e.into())
        }
        None => {
            info!("Shutdown signal received");
            node.depart().await?;
            info!("Shutting down");
            Ok(())
        }
    }
}
