//! Master state shared by request handlers and background tasks

use crate::common::{
    encode_name, timestamp_now_millis, validate_id, AddressBook, ClusterGauges, Error,
    MasterConfig, MetricsRegistry, Result,
};
use crate::master::election::{LeaderElector, Role};
use crate::master::metadata::{ChunkRecord, FileRecord, MetadataStore, WorkerNode};
use crate::master::peer_client::{LeaderView, PeerClient};
use crate::master::placement::ChunkPlacementEngine;
use crate::master::registry::WorkerRegistry;
use crate::master::replicator::MetadataReplicator;
use crate::master::worker_client::WorkerClient;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Body of `POST /metadata`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub file_id: String,
    pub file_name: String,
    /// Defaults to the sum of the chunk sizes
    #[serde(default)]
    pub size: Option<u64>,
    pub chunks: Vec<ChunkRecord>,
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub node_id: String,
    pub role: Role,
    pub leader: Option<String>,
    pub term: u64,
    pub peers: Vec<String>,
    pub active_workers: Vec<String>,
    pub known_workers: usize,
    pub files: usize,
    pub sync_pending: BTreeMap<String, usize>,
    pub chunk_size: usize,
    pub replication_factor: usize,
    pub version: String,
}

#[derive(Clone)]
pub struct MasterState {
    pub config: Arc<MasterConfig>,
    pub store: Arc<MetadataStore>,
    pub registry: Arc<WorkerRegistry>,
    pub elector: Arc<LeaderElector>,
    pub placement: Arc<ChunkPlacementEngine>,
    pub replicator: Arc<MetadataReplicator>,
    pub metrics: Arc<MetricsRegistry>,
}

impl MasterState {
    /// Open the metadata store and wire every component for `config`.
    pub fn open(config: MasterConfig) -> Result<Self> {
        config.validate()?;
        let book = AddressBook::new(&config.node_id, &config.cluster)?;

        std::fs::create_dir_all(&config.db_path)?;
        let store = Arc::new(MetadataStore::open(&config.db_path)?);
        let metrics = Arc::new(MetricsRegistry::new());

        let peers = Arc::new(PeerClient::new(config.probe_timeout(), config.push_timeout())?);
        let workers = Arc::new(WorkerClient::new(config.probe_timeout(), config.push_timeout())?);

        let registry = Arc::new(WorkerRegistry::with_store(
            config.heartbeat_timeout(),
            store.clone(),
        )?);
        let elector = Arc::new(
            LeaderElector::new(book.clone(), peers.clone(), metrics.clone())
                .with_store(store.clone())?,
        );
        let placement = Arc::new(ChunkPlacementEngine::new(
            workers,
            registry.clone(),
            metrics.clone(),
        ));
        let replicator = Arc::new(MetadataReplicator::new(
            book,
            peers,
            store.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            elector,
            placement,
            replicator,
            metrics,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Split, place, commit and replicate a new file. Leader only.
    pub async fn upload(&self, file_name: &str, content: Bytes) -> Result<FileRecord> {
        self.elector.require_leader()?;
        if file_name.is_empty() {
            return Err(Error::InvalidRecord("file name is empty".into()));
        }

        let file_id = Uuid::new_v4().to_string();
        let size = content.len() as u64;
        let started = Instant::now();

        let chunks = match self
            .placement
            .place(
                content,
                &file_id,
                self.config.chunk_size,
                self.config.replication_factor,
            )
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                self.metrics.upload_failures.inc();
                warn!(file_id = %file_id, file_name, error = %e, "Upload failed");
                return Err(e);
            }
        };
        self.metrics.placement_latency.observe(started.elapsed());
        self.metrics.bytes_placed.add(size);
        self.metrics
            .chunk_pushes
            .add((chunks.len() * self.config.replication_factor) as u64);

        let now = timestamp_now_millis();
        let record = FileRecord {
            file_id,
            file_name: file_name.to_string(),
            size,
            chunks,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if let Err(e) = self
            .placement
            .commit_or_release(&record.chunks, || self.store.put(&record))
            .await
        {
            self.metrics.upload_failures.inc();
            warn!(file_id = %record.file_id, error = %e, "Metadata write failed");
            return Err(e);
        }
        self.metrics.uploads_total.inc();
        info!(
            file_id = %record.file_id,
            file_name,
            size,
            chunks = record.chunks.len(),
            "File committed"
        );

        self.replicator.on_commit(record.clone());
        Ok(record)
    }

    /// Commit metadata for chunks placed by someone else. Leader only.
    pub fn commit(&self, request: CommitRequest) -> Result<FileRecord> {
        self.elector.require_leader()?;

        let size = request
            .size
            .unwrap_or_else(|| request.chunks.iter().map(|c| c.size).sum());
        let now = timestamp_now_millis();
        let existing = self.store.find(&request.file_id)?;

        let record = FileRecord {
            created_at: existing.as_ref().map_or(now, |r| r.created_at),
            // keep last-writer-wins ordering strict on fast re-uploads
            updated_at: existing
                .as_ref()
                .map_or(now, |r| now.max(r.updated_at + 1)),
            file_id: request.file_id,
            file_name: request.file_name,
            size,
            chunks: request.chunks,
            deleted_at: None,
        };
        record.validate()?;
        self.store.put(&record)?;
        info!(file_id = %record.file_id, chunks = record.chunks.len(), "Metadata committed");

        self.replicator.on_commit(record.clone());
        Ok(record)
    }

    /// Soft delete a file, drop its chunks from active workers and replicate
    /// the tombstone. Leader only.
    pub async fn delete_file(&self, file_id: &str) -> Result<FileRecord> {
        self.elector.require_leader()?;
        let record = self.store.soft_delete(file_id, timestamp_now_millis())?;
        let removed = self.placement.release(&record.chunks).await;
        info!(file_id, removed_replicas = removed, "File deleted");

        self.replicator.on_commit(record.clone());
        Ok(record)
    }

    /// Apply a record pushed by a peer
    pub fn accept_sync(&self, record: &FileRecord) -> Result<bool> {
        record.validate()?;
        let applied = self.store.put_if_newer(record)?;
        if !applied {
            info!(file_id = %record.file_id, "Ignored older synced record");
        }
        Ok(applied)
    }

    /// URL of an active replica holder of `chunk_id`
    pub fn locate_chunk(&self, file_id: &str, chunk_id: &str) -> Result<String> {
        validate_id("file_id", file_id)?;
        let record = self.store.get(file_id)?;
        if record.is_deleted() {
            return Err(Error::NotFound(format!("file {} is deleted", file_id)));
        }
        let chunk = record
            .chunk(chunk_id)
            .ok_or_else(|| Error::NotFound(format!("chunk {} of {}", chunk_id, file_id)))?;

        chunk
            .replica_worker_ids
            .iter()
            .filter_map(|id| self.registry.get(id))
            .find(WorkerNode::is_active)
            .map(|w| format!("{}/chunks/{}", w.address, encode_name(chunk_id)))
            .ok_or_else(|| Error::NoActiveReplica(chunk_id.to_string()))
    }

    /// Pull metadata after leadership moved: a follower syncs from its new
    /// leader, a new leader from every reachable peer.
    pub async fn resync_after_change(&self, before: &LeaderView) {
        let now = self.elector.view();
        if now.leader == before.leader {
            return;
        }
        let Some(leader) = now.leader else {
            return;
        };

        let sources: Vec<String> = if leader == self.node_id() {
            self.elector
                .book()
                .peers()
                .into_iter()
                .map(|p| p.id)
                .collect()
        } else {
            vec![leader]
        };
        for peer in sources {
            if let Err(e) = self.replicator.resync_from(&peer).await {
                warn!(peer = %peer, error = %e, "Metadata resync failed");
            }
        }
    }

    pub fn gauges(&self) -> ClusterGauges {
        let state = self.elector.state();
        ClusterGauges {
            is_leader: state.role == Role::Leader,
            term: state.term,
            active_workers: self.registry.active_count(),
            sync_pending: self.replicator.pending_total(),
        }
    }

    pub fn status(&self) -> Result<StatusReport> {
        let state = self.elector.state();
        let files = self.store.list_all(false)?.len();
        Ok(StatusReport {
            node_id: self.node_id().to_string(),
            role: state.role,
            leader: state.leader,
            term: state.term,
            peers: self
                .elector
                .book()
                .peers()
                .into_iter()
                .map(|p| p.id)
                .collect(),
            active_workers: self
                .registry
                .list_active()
                .into_iter()
                .map(|w| w.worker_id)
                .collect(),
            known_workers: self.registry.list_all().len(),
            files,
            sync_pending: self.replicator.pending(),
            chunk_size: self.config.chunk_size,
            replication_factor: self.config.replication_factor,
            version: crate::VERSION.to_string(),
        })
    }
}
