//! Worker server

use crate::common::periodic::spawn_periodic;
use crate::common::{format_bytes, Result, WorkerConfig};
use crate::worker::heartbeat::HeartbeatSender;
use crate::worker::http::{create_router, WorkerState};
use crate::worker::store::ChunkDirectory;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct WorkerServer {
    config: WorkerConfig,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;
        let config = self.config;

        tracing::info!("Starting worker: {}", config.worker_id);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Advertised as: {}", config.advertise_url);
        tracing::info!("  Data dir: {}", config.data_dir.display());
        tracing::info!("  Masters: {}", config.masters.len());

        let store = Arc::new(ChunkDirectory::open(&config.data_dir).await?);
        let usage = store.usage().await?;
        tracing::info!(
            "  Holding {} chunk(s), {}",
            usage.chunks,
            format_bytes(usage.bytes)
        );

        let sender = Arc::new(HeartbeatSender::new(
            config.worker_id.clone(),
            config.advertise_url.clone(),
            config.masters.clone(),
            config.request_timeout(),
        )?);
        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeats = spawn_periodic(
            "heartbeat",
            config.heartbeat_interval(),
            true,
            stop_rx,
            move || {
                let sender = sender.clone();
                async move {
                    sender.beat().await;
                }
            },
        );

        let router = create_router(
            WorkerState {
                store,
                worker_id: config.worker_id.clone(),
            },
            config.max_chunk_bytes,
        );
        tracing::info!("✓ Worker {} ready", config.worker_id);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        if let Err(e) = heartbeats.await {
            tracing::error!("Heartbeat task panicked: {}", e);
        }
        tracing::info!("Worker {} stopped", config.worker_id);

        served?;
        Ok(())
    }
}
