//! Node binary

use clap::{Parser, Subcommand};
use ringkv::common::PeerConfig;
use ringkv::{Config, NodeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ringkv-node")]
#[command(about = "ringkv storage node")]
#[command(version)]
struct Cli {
    /// Config file stem (ringkv.toml by default)
    #[arg(long, default_value = "ringkv")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node server
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Remote nodes as id=url (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<PeerConfig>,

        /// Extra nodes hosted by this process (comma-separated)
        #[arg(long, value_delimiter = ',')]
        local_nodes: Vec<String>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Directory for persisted backups
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Directory for persistent node stores (sled-backend builds)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and env, then override with CLI arguments
    let mut config = Config::load_from(&cli.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            peers,
            local_nodes,
            replicas,
            backup_dir,
            data_dir,
        } => {
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if !peers.is_empty() {
                config.peers = peers;
            }
            if !local_nodes.is_empty() {
                config.local_nodes = local_nodes;
            }
            if let Some(replicas) = replicas {
                config.cluster.replication_factor = replicas;
            }
            if backup_dir.is_some() {
                config.backup.dir = backup_dir;
            }
            if data_dir.is_some() {
                config.data_dir = data_dir;
            }
            config.validate()?;

            NodeServer::new(config).serve().await?;
        }
    }

    Ok(())
}
