//! Master binary

use clap::{Parser, Subcommand};
use minidfs::common::{Config, MasterNode};
use minidfs::Master;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-master")]
#[command(about = "minidfs master node with Bully leader election")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start master server
    Serve {
        /// TOML config file (its [master] table is used)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Every master including this one, as id=url (comma-separated)
        #[arg(long, value_delimiter = ',')]
        cluster: Vec<MasterNode>,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Workers silent for this long are marked inactive
        #[arg(long)]
        heartbeat_timeout_ms: Option<u64>,

        /// Leader liveness check period
        #[arg(long)]
        leader_check_interval_ms: Option<u64>,

        /// Metadata sync retry period
        #[arg(long)]
        retry_interval_ms: Option<u64>,

        /// Log level when RUST_LOG is unset
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            db,
            cluster,
            chunk_size,
            replicas,
            heartbeat_timeout_ms,
            leader_check_interval_ms,
            retry_interval_ms,
            log_level,
        } => {
            // Load config from file and env, then override with CLI arguments
            let file_config = Config::load(config.as_deref())?;
            let level = log_level.unwrap_or_else(|| file_config.log_level.clone());
            init_tracing(&level);

            let mut master_config = file_config.master.unwrap_or_default();
            if let Some(id) = id {
                master_config.node_id = id;
            }
            if let Some(bind) = bind {
                master_config.bind_addr = bind;
            }
            if let Some(db) = db {
                master_config.db_path = db;
            }
            if !cluster.is_empty() {
                master_config.cluster = cluster;
            }
            if let Some(chunk_size) = chunk_size {
                master_config.chunk_size = chunk_size;
            }
            if let Some(replicas) = replicas {
                master_config.replication_factor = replicas;
            }
            if let Some(ms) = heartbeat_timeout_ms {
                master_config.heartbeat_timeout_ms = ms;
            }
            if let Some(ms) = leader_check_interval_ms {
                master_config.leader_check_interval_ms = ms;
            }
            if let Some(ms) = retry_interval_ms {
                master_config.replication_retry_interval_ms = ms;
            }
            // a lone master with no cluster list is a cluster of one
            if master_config.cluster.is_empty() {
                master_config.cluster = vec![MasterNode::new(
                    master_config.node_id.clone(),
                    format!("http://{}", master_config.bind_addr),
                )];
            }
            master_config.validate()?;

            Master::new(master_config).serve().await?;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
