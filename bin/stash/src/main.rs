//! Stash command line client.
//!
//! Talks to a running `stashd` over the storage RPC: put, get, add,
//! remove, and digest with hex-abbreviated keys.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use stash_core::{Key160, SigningKey};
use stash_net::{NetTransport, PeerAddress, TransportConfig};
use stash_proto::Data;
use stash_rpc::{
    AddBuilder, DigestBuilder, GetBuilder, PutBuilder, RemoveBuilder, StorageClient,
};

/// Stash storage client.
#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address of the stashd to talk to
    #[arg(short, long, default_value = "127.0.0.1:7477")]
    addr: SocketAddr,

    /// Peer id of the stashd (hex); zero when unknown
    #[arg(long, default_value = "00")]
    peer_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Put {
        /// Location key (hex)
        #[arg(short, long)]
        location: String,
        /// Domain key (hex)
        #[arg(short, long)]
        domain: String,
        /// Content key (hex)
        #[arg(short, long)]
        content: String,
        /// Refuse to overwrite an existing entry
        #[arg(long)]
        if_absent: bool,
        /// The value to store
        value: String,
    },

    /// Read a bucket or a single content key
    Get {
        /// Location key (hex)
        #[arg(short, long)]
        location: String,
        /// Domain key (hex)
        #[arg(short, long)]
        domain: String,
        /// Restrict to one content key (hex)
        #[arg(short, long)]
        content: Option<String>,
        /// Maximum number of entries; negative = unlimited
        #[arg(long, default_value_t = -1)]
        limit: i32,
        /// Scan in descending key order
        #[arg(long)]
        descending: bool,
    },

    /// Add values keyed by payload hash (or randomly in list mode)
    Add {
        /// Location key (hex)
        #[arg(short, long)]
        location: String,
        /// Domain key (hex)
        #[arg(short, long)]
        domain: String,
        /// Keep duplicate payloads as separate entries
        #[arg(long)]
        list: bool,
        /// The values to store
        values: Vec<String>,
    },

    /// Remove entries
    Remove {
        /// Location key (hex)
        #[arg(short, long)]
        location: String,
        /// Domain key (hex)
        #[arg(short, long)]
        domain: String,
        /// Restrict to one content key (hex)
        #[arg(short, long)]
        content: Option<String>,
        /// Print the removed values, not just their keys
        #[arg(long)]
        echo: bool,
    },

    /// Summarize a bucket
    Digest {
        /// Location key (hex)
        #[arg(short, long)]
        location: String,
        /// Domain key (hex)
        #[arg(short, long)]
        domain: String,
        /// Ask for bloom filters instead of the exact key map
        #[arg(long)]
        bloom: bool,
    },
}

fn parse_key(hex_key: &str) -> Result<Key160> {
    Key160::from_hex(hex_key).with_context(|| format!("invalid key {hex_key:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let signing_key = SigningKey::random();
    let local_id = Key160::hash_of(signing_key.public_key().as_bytes());
    let transport = Arc::new(NetTransport::new(TransportConfig::default()));
    let client = StorageClient::new(local_id, signing_key, transport);
    let peer = PeerAddress::new(parse_key(&cli.peer_id)?, cli.addr);

    match cli.command {
        Commands::Put {
            location,
            domain,
            content,
            if_absent,
            value,
        } => {
            let mut builder = PutBuilder::new(parse_key(&location)?, parse_key(&domain)?)
                .data(parse_key(&content)?, Data::new(value.into_bytes()));
            if if_absent {
                builder = builder.put_if_absent();
            }
            let result = client.put(&peer, &builder).await?;
            for (key, status) in result.statuses.iter() {
                println!("{key}  status={status}");
            }
        }

        Commands::Get {
            location,
            domain,
            content,
            limit,
            descending,
        } => {
            let mut builder = GetBuilder::new()
                .bucket(parse_key(&location)?, parse_key(&domain)?)
                .limit(limit);
            if let Some(content) = content {
                builder = builder.content_keys([parse_key(&content)?]);
            }
            if descending {
                builder = builder.descending();
            }
            let map = client.get(&peer, &builder).await?;
            if map.is_empty() {
                println!("(no entries)");
            }
            for (key, data) in map.iter() {
                println!("{key}  {}", String::from_utf8_lossy(data.payload()));
            }
        }

        Commands::Add {
            location,
            domain,
            list,
            values,
        } => {
            let mut builder = AddBuilder::new(parse_key(&location)?, parse_key(&domain)?);
            for value in values {
                builder = builder.data(Data::new(value.into_bytes()));
            }
            if list {
                builder = builder.list();
            }
            let result = client.add(&peer, &builder).await?;
            for (key, status) in result.statuses.iter() {
                println!("{key}  status={status}");
            }
        }

        Commands::Remove {
            location,
            domain,
            content,
            echo,
        } => {
            let mut builder =
                RemoveBuilder::new().bucket(parse_key(&location)?, parse_key(&domain)?);
            if let Some(content) = content {
                builder = builder.content_keys([parse_key(&content)?]);
            }
            if echo {
                builder = builder.return_results();
            }
            let result = client.remove(&peer, &builder).await?;
            match result.data {
                Some(data) => {
                    for (key, value) in data.iter() {
                        println!("{key}  {}", String::from_utf8_lossy(value.payload()));
                    }
                }
                None => {
                    for key in &result.keys {
                        println!("{key}");
                    }
                }
            }
            if result.keys.is_empty() {
                println!("(nothing removed)");
            }
        }

        Commands::Digest {
            location,
            domain,
            bloom,
        } => {
            let mut builder =
                DigestBuilder::new().bucket(parse_key(&location)?, parse_key(&domain)?);
            if bloom {
                builder = builder.return_bloom_filter();
            }
            let result = client.digest(&peer, &builder).await?;
            match result.digests {
                Some(map) => {
                    for (key, digest) in map.iter() {
                        println!("{key}  digest={digest}");
                    }
                }
                None => {
                    println!(
                        "content bloom: {} bits",
                        result
                            .content_filter
                            .map(|filter| filter.bit_count())
                            .unwrap_or(0)
                    );
                    println!(
                        "version bloom: {} bits",
                        result
                            .version_filter
                            .map(|filter| filter.bit_count())
                            .unwrap_or(0)
                    );
                }
            }
        }
    }

    Ok(())
}
