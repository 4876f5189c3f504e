//! Stash daemon - serves the storage RPC on a socket.
//!
//! Wires together the in-memory entry store, the RPC dispatcher, and
//! the TCP/UDP server loop, plus the maintenance interval that expires
//! TTL'd entries and a drain task for responsibility updates.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::select;
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use stash_core::{Key160, SigningKey};
use stash_net::{RpcServer, TransportConfig};
use stash_rpc::StorageRpc;
use stash_store::{MemoryStore, ResponsibilityTracker, StoreConfig};

/// Stash storage daemon.
#[derive(Parser)]
#[command(name = "stashd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Listen address for TCP and UDP
    #[arg(short, long, default_value = "127.0.0.1:7477")]
    listen: SocketAddr,

    /// Maximum number of stored entries
    #[arg(long, default_value_t = 1_000_000)]
    max_entries: usize,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval: u64,

    /// Hex-encoded 32-byte identity seed; random when absent
    #[arg(long)]
    identity: Option<String>,
}

fn signing_key_from_cli(identity: Option<&str>) -> Result<SigningKey> {
    match identity {
        None => Ok(SigningKey::random()),
        Some(hex_seed) => {
            let bytes = hex::decode(hex_seed).context("identity is not valid hex")?;
            let seed: [u8; 32] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("identity seed must be 32 bytes"))?;
            Ok(SigningKey::new(seed))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let signing_key = signing_key_from_cli(cli.identity.as_deref())?;
    let node_id = Key160::hash_of(signing_key.public_key().as_bytes());
    info!(%node_id, "starting stashd");

    let store_config = StoreConfig {
        max_entries: cli.max_entries,
        sweep_interval: Duration::from_secs(cli.sweep_interval),
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::new(store_config.clone()));
    let (tracker, mut responsibility_rx) = ResponsibilityTracker::new();
    let tracker = Arc::new(tracker);

    let rpc = StorageRpc::new(node_id, signing_key, store.clone())
        .with_replication(tracker.clone());
    let server = RpcServer::bind(cli.listen, Arc::new(rpc), TransportConfig::default())
        .await
        .context("failed to bind the rpc server")?;
    info!(addr = %server.local_addr(), "serving storage rpc");

    // Replication subsystem stand-in: log what we become responsible
    // for so an operator can watch the data spread.
    let drain = tokio::spawn(async move {
        while let Some(update) = responsibility_rx.recv().await {
            if update.newly_responsible {
                debug!(location = %update.location, "now responsible");
            }
        }
    });

    let mut sweep = interval(store_config.sweep_interval);
    loop {
        select! {
            _ = sweep.tick() => {
                let dropped = store.expire();
                if dropped > 0 {
                    info!(dropped, remaining = store.len(), "expiry sweep");
                }
            }
            result = signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                info!("shutting down");
                break;
            }
        }
    }

    server.shutdown();
    drain.abort();
    Ok(())
}
