//! Master server

use crate::common::{format_bytes, MasterConfig, Result};
use crate::master::http::create_router;
use crate::master::state::MasterState;
use crate::master::tasks::start_background_tasks;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct Master {
    config: MasterConfig,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
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
        let peers: Vec<&str> = self
            .config
            .cluster
            .iter()
            .filter(|m| m.id != self.config.node_id)
            .map(|m| m.id.as_str())
            .collect();
        tracing::info!("Starting master: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!("  Peers: {:?}", peers);
        tracing::info!(
            "  Chunk size: {}, replication factor: {}",
            format_bytes(self.config.chunk_size as u64),
            self.config.replication_factor
        );

        let state = MasterState::open(self.config)?;
        let known = state.registry.list_all().len();
        if known > 0 {
            tracing::info!("  Restored {} worker(s) from disk", known);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = start_background_tasks(&state, stop_rx);

        let router = create_router(state.clone());
        tracing::info!("✓ Master {} ready", state.node_id());

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Background task panicked: {}", e);
            }
        }
        state.store.flush()?;
        tracing::info!("Master {} stopped", state.node_id());

        served?;
        Ok(())
    }
}
