//! Chunk placement
//!
//! Splits an upload into fixed-size chunks, picks a random set of distinct
//! active workers for each chunk and pushes every replica concurrently.
//! Replica sets for the whole file are drawn from one registry snapshot
//! before the first byte is sent.

use crate::common::{blake3_hash, Error, MetricsRegistry, Result};
use crate::master::metadata::{chunk_id, ChunkRecord, WorkerNode};
use crate::master::registry::WorkerRegistry;
use crate::master::worker_client::{ChunkStore, WorkerClient};
use bytes::Bytes;
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A chunk with its replica set, decided before any write
#[derive(Debug, Clone)]
struct PlannedChunk {
    chunk_id: String,
    data: Bytes,
    replicas: Vec<WorkerNode>,
}

/// A replica this upload managed to write
#[derive(Debug, Clone)]
struct WrittenReplica {
    chunk_id: String,
    worker_id: String,
    address: String,
}

pub struct ChunkPlacementEngine<S = WorkerClient> {
    store: Arc<S>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl<S: ChunkStore> ChunkPlacementEngine<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<WorkerRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Place `content` for `file_id`. Returns one record per chunk, in order.
    ///
    /// If any replica write fails the upload is abandoned and every replica
    /// already written for it is deleted best effort.
    pub async fn place(
        &self,
        content: Bytes,
        file_id: &str,
        chunk_size: usize,
        replication_factor: usize,
    ) -> Result<Vec<ChunkRecord>> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be positive".into(),
            ));
        }

        let active = self.registry.list_active();
        if active.len() < replication_factor {
            return Err(Error::InsufficientReplicas {
                needed: replication_factor,
                available: active.len(),
            });
        }

        let plan = plan_chunks(&content, file_id, chunk_size, replication_factor, &active);
        debug!(
            file_id,
            chunks = plan.len(),
            replication_factor,
            "Placement planned"
        );

        let mut written: Vec<WrittenReplica> = Vec::new();
        let mut records = Vec::with_capacity(plan.len());

        for chunk in plan {
            let checksum = blake3_hash(&chunk.data);

            // Spawned so each push runs to completion even if this upload is dropped.
            let pushes: Vec<_> = chunk
                .replicas
                .iter()
                .map(|worker| {
                    let store = self.store.clone();
                    let address = worker.address.clone();
                    let id = chunk.chunk_id.clone();
                    let data = chunk.data.clone();
                    let sum = checksum.clone();
                    tokio::spawn(async move { store.store_chunk(&address, &id, data, &sum).await })
                })
                .collect();

            let mut failure: Option<(String, String)> = None;
            for (worker, joined) in chunk.replicas.iter().zip(join_all(pushes).await) {
                let result = joined.unwrap_or_else(|e| Err(Error::Internal(e.to_string())));
                match result {
                    Ok(()) => written.push(WrittenReplica {
                        chunk_id: chunk.chunk_id.clone(),
                        worker_id: worker.worker_id.clone(),
                        address: worker.address.clone(),
                    }),
                    Err(e) => {
                        self.metrics.chunk_push_failures.inc();
                        warn!(
                            chunk_id = %chunk.chunk_id,
                            worker_id = %worker.worker_id,
                            error = %e,
                            "Chunk push failed"
                        );
                        if failure.is_none() {
                            failure = Some((worker.worker_id.clone(), e.to_string()));
                        }
                    }
                }
            }

            if let Some((worker_id, reason)) = failure {
                self.remove_written(&written).await;
                return Err(Error::Placement {
                    chunk_id: chunk.chunk_id,
                    worker_id,
                    reason,
                });
            }

            records.push(ChunkRecord {
                chunk_id: chunk.chunk_id,
                size: chunk.data.len() as u64,
                replica_worker_ids: chunk.replicas.into_iter().map(|w| w.worker_id).collect(),
                blake3: checksum,
            });
        }

        info!(
            file_id,
            chunks = records.len(),
            bytes = content.len(),
            "Placement complete"
        );
        Ok(records)
    }

    /// Run `commit` for freshly placed `chunks`; if it fails the chunks are
    /// released so they do not outlive the failed upload.
    pub async fn commit_or_release<T>(
        &self,
        chunks: &[ChunkRecord],
        commit: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        match commit() {
            Ok(value) => Ok(value),
            Err(e) => {
                let removed = self.release(chunks).await;
                warn!(
                    chunks = chunks.len(),
                    removed,
                    error = %e,
                    "Commit failed, placed chunks released"
                );
                Err(e)
            }
        }
    }

    /// Delete every replica of `chunks` held by a currently active worker.
    /// Returns how many deletions succeeded; failures are only logged.
    pub async fn release(&self, chunks: &[ChunkRecord]) -> usize {
        let targets: Vec<WrittenReplica> = chunks
            .iter()
            .flat_map(|chunk| {
                chunk.replica_worker_ids.iter().filter_map(|worker_id| {
                    self.registry
                        .get(worker_id)
                        .filter(|w| w.is_active())
                        .map(|w| WrittenReplica {
                            chunk_id: chunk.chunk_id.clone(),
                            worker_id: w.worker_id,
                            address: w.address,
                        })
                })
            })
            .collect();
        self.remove_written(&targets).await
    }

    async fn remove_written(&self, replicas: &[WrittenReplica]) -> usize {
        let deletions = replicas.iter().map(|replica| async move {
            let result = self
                .store
                .delete_chunk(&replica.address, &replica.chunk_id)
                .await;
            if let Err(e) = &result {
                warn!(
                    chunk_id = %replica.chunk_id,
                    worker_id = %replica.worker_id,
                    error = %e,
                    "Chunk cleanup failed"
                );
            }
            result.is_ok()
        });
        join_all(deletions).await.into_iter().filter(|ok| *ok).count()
    }
}

fn plan_chunks(
    content: &Bytes,
    file_id: &str,
    chunk_size: usize,
    replication_factor: usize,
    active: &[WorkerNode],
) -> Vec<PlannedChunk> {
    let mut rng = rand::thread_rng();
    let count = content.len().div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(content.len());
            PlannedChunk {
                chunk_id: chunk_id(file_id, i + 1),
                data: content.slice(start..end),
                replicas: active
                    .choose_multiple(&mut rng, replication_factor)
                    .cloned()
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    const MB: usize = 1024 * 1024;

    /// Records every call; fails pushes to the listed addresses.
    #[derive(Default)]
    struct MockStore {
        stored: Mutex<Vec<(String, String, usize)>>,
        deleted: Mutex<Vec<(String, String)>>,
        failing: HashSet<String>,
        delay: Duration,
    }

    impl ChunkStore for MockStore {
        async fn store_chunk(
            &self,
            address: &str,
            chunk_id: &str,
            data: Bytes,
            checksum: &str,
        ) -> Result<()> {
            assert_eq!(checksum, blake3_hash(&data));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.contains(address) {
                return Err(Error::PeerUnreachable(address.to_string()));
            }
            self.stored
                .lock()
                .unwrap()
                .push((address.to_string(), chunk_id.to_string(), data.len()));
            Ok(())
        }

        async fn delete_chunk(&self, address: &str, chunk_id: &str) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push((address.to_string(), chunk_id.to_string()));
            Ok(())
        }
    }

    fn registry_with(workers: usize) -> Arc<WorkerRegistry> {
        let registry = Arc::new(WorkerRegistry::new(Duration::from_secs(15)));
        for i in 1..=workers {
            registry
                .heartbeat(&format!("w{}", i), &format!("http://worker-{}", i))
                .unwrap();
        }
        registry
    }

    fn engine_with(store: Arc<MockStore>, workers: usize) -> ChunkPlacementEngine<MockStore> {
        ChunkPlacementEngine::new(store, registry_with(workers), Arc::new(MetricsRegistry::new()))
    }

    #[tokio::test]
    async fn test_place_splits_and_replicates() {
        let store = Arc::new(MockStore::default());
        let engine = engine_with(store.clone(), 5);

        let content = Bytes::from(vec![7u8; 10 * MB]);
        let chunks = engine.place(content, "f1", 4 * MB, 3).await.unwrap();

        let sizes: Vec<u64> = chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![4 * MB as u64, 4 * MB as u64, 2 * MB as u64]);
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["f1_chunk_1", "f1_chunk_2", "f1_chunk_3"]);

        for chunk in &chunks {
            let distinct: HashSet<_> = chunk.replica_worker_ids.iter().collect();
            assert_eq!(distinct.len(), 3);
            assert_eq!(chunk.blake3.len(), 64);
        }
        assert_eq!(store.stored.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_insufficient_workers_writes_nothing() {
        let store = Arc::new(MockStore::default());
        let engine = engine_with(store.clone(), 2);

        let err = engine
            .place(Bytes::from_static(b"hello"), "f1", 4, 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientReplicas {
                needed: 3,
                available: 2
            }
        ));
        assert!(store.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let engine = engine_with(Arc::new(MockStore::default()), 3);
        let data = Bytes::from_static(b"abc");
        assert!(matches!(
            engine.place(data.clone(), "f1", 0, 1).await,
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            engine.place(data, "f1", 4, 0).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_content_has_no_chunks() {
        let store = Arc::new(MockStore::default());
        let engine = engine_with(store.clone(), 3);
        let chunks = engine.place(Bytes::new(), "f1", 4, 3).await.unwrap();
        assert!(chunks.is_empty());
        assert!(store.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_push_cleans_up_written_replicas() {
        let store = Arc::new(MockStore {
            failing: HashSet::from(["http://worker-2".to_string()]),
            ..Default::default()
        });
        let engine = engine_with(store.clone(), 2);

        // rf 2 of 2 workers: every chunk hits the failing one
        let err = engine
            .place(Bytes::from(vec![1u8; 10]), "f1", 4, 2)
            .await
            .unwrap_err();
        match err {
            Error::Placement {
                chunk_id,
                worker_id,
                ..
            } => {
                assert_eq!(chunk_id, "f1_chunk_1");
                assert_eq!(worker_id, "w2");
            }
            other => panic!("unexpected error: {other}"),
        }

        let stored = store.stored.lock().unwrap().clone();
        let deleted = store.deleted.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            deleted,
            vec![("http://worker-1".to_string(), "f1_chunk_1".to_string())]
        );
        assert_eq!(engine.metrics.chunk_push_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_placed_chunks() {
        let store = Arc::new(MockStore::default());
        let engine = engine_with(store.clone(), 3);
        let chunks = engine
            .place(Bytes::from(vec![5u8; 6]), "f1", 4, 3)
            .await
            .unwrap();

        let err = engine
            .commit_or_release(&chunks, || -> Result<()> {
                Err(Error::MetadataCorrupted("disk full".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MetadataCorrupted(_)));

        let mut deleted = store.deleted.lock().unwrap().clone();
        deleted.sort();
        let mut stored: Vec<(String, String)> = store
            .stored
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, id, _)| (addr.clone(), id.clone()))
            .collect();
        stored.sort();
        assert_eq!(deleted.len(), 6);
        assert_eq!(deleted, stored);

        let kept = engine.commit_or_release(&chunks, || Ok(7)).await.unwrap();
        assert_eq!(kept, 7);
        assert_eq!(store.deleted.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_cancelled_placement_pushes_still_complete() {
        let store = Arc::new(MockStore {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let engine = engine_with(store.clone(), 3);

        let placing = engine.place(Bytes::from(vec![3u8; 4]), "f1", 4, 3);
        let outcome = tokio::time::timeout(Duration::from_millis(20), placing).await;
        assert!(outcome.is_err());
        assert!(store.stored.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let stored = store.stored.lock().unwrap().clone();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|(_, id, len)| id == "f1_chunk_1" && *len == 4));
    }

    #[tokio::test]
    async fn test_release_skips_inactive_holders() {
        let store = Arc::new(MockStore::default());
        let registry = registry_with(3);
        let engine = ChunkPlacementEngine::new(
            store.clone(),
            registry.clone(),
            Arc::new(MetricsRegistry::new()),
        );

        registry.heartbeat_at("w3", "http://worker-3", 0).unwrap();
        registry.sweep().unwrap();

        let chunks = vec![ChunkRecord {
            chunk_id: "f1_chunk_1".into(),
            size: 1,
            replica_worker_ids: vec!["w1".into(), "w3".into(), "w9".into()],
            blake3: String::new(),
        }];
        assert_eq!(engine.release(&chunks).await, 1);
        assert_eq!(store.deleted.lock().unwrap()[0].0, "http://worker-1");
    }
}
