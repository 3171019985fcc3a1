//! Worker binary

use clap::{Parser, Subcommand};
use minidfs::common::{Config, MasterNode};
use minidfs::WorkerServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-worker")]
#[command(about = "minidfs chunk storage worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start worker server
    Serve {
        /// TOML config file (its [worker] table is used)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Worker ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the chunk API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// URL the masters should use to reach this worker
        #[arg(long)]
        advertise: Option<String>,

        /// Chunk directory
        #[arg(long)]
        data: Option<PathBuf>,

        /// Masters to heartbeat, as id=url (comma-separated)
        #[arg(long, value_delimiter = ',')]
        masters: Vec<MasterNode>,

        /// Heartbeat period
        #[arg(long)]
        heartbeat_interval_ms: Option<u64>,

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
            advertise,
            data,
            masters,
            heartbeat_interval_ms,
            log_level,
        } => {
            let file_config = Config::load(config.as_deref())?;
            let level = log_level.unwrap_or_else(|| file_config.log_level.clone());
            init_tracing(&level);

            let mut worker_config = file_config.worker.unwrap_or_default();
            if let Some(id) = id {
                worker_config.worker_id = id;
            }
            if let Some(bind) = bind {
                worker_config.bind_addr = bind;
            }
            match advertise {
                Some(url) => worker_config.advertise_url = url,
                // follow --bind unless the file set an explicit URL
                None if bind.is_some() => {
                    worker_config.advertise_url = format!("http://{}", worker_config.bind_addr)
                }
                None => {}
            }
            if let Some(data) = data {
                worker_config.data_dir = data;
            }
            if !masters.is_empty() {
                worker_config.masters = masters;
            }
            if let Some(ms) = heartbeat_interval_ms {
                worker_config.heartbeat_interval_ms = ms;
            }
            if worker_config.masters.is_empty() {
                tracing::warn!("No masters configured; this worker will never be placed on");
            }

            WorkerServer::new(worker_config).serve().await?;
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
