//! Best-effort metadata replication between masters
//!
//! Committed records are pushed to every peer in the background. A failed
//! push lands in that peer's FIFO retry queue; the retry loop drains the
//! queues in order and keeps failures at the front with a bumped attempt
//! count. Queues are unbounded and live in memory only.

use crate::common::{AddressBook, Error, MetricsRegistry, Result};
use crate::master::metadata::{FileRecord, MetadataStore};
use crate::master::peer_client::{PeerClient, PeerTransport};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A pending push of one record to one peer
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub target_master_id: String,
    pub payload: FileRecord,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub delivered: usize,
    pub still_pending: usize,
}

pub struct MetadataReplicator<P = PeerClient> {
    book: AddressBook,
    transport: Arc<P>,
    store: Arc<MetadataStore>,
    queues: Mutex<HashMap<String, VecDeque<SyncTask>>>,
    metrics: Arc<MetricsRegistry>,
}

impl<P: PeerTransport> MetadataReplicator<P> {
    pub fn new(
        book: AddressBook,
        transport: Arc<P>,
        store: Arc<MetadataStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            book,
            transport,
            store,
            queues: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Replicate a freshly committed record without blocking the caller.
    pub fn on_commit(self: &Arc<Self>, record: FileRecord) -> JoinHandle<usize> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.replicate(record).await })
    }

    /// Push `record` to every peer concurrently; failures are queued.
    /// Returns the number of peers that took it.
    pub async fn replicate(&self, record: FileRecord) -> usize {
        let peers = self.book.peers();
        let record = &record;
        let pushes = peers.iter().map(|peer| async move {
            (peer, self.transport.push_record(&peer.address, record).await)
        });

        let mut delivered = 0;
        for (peer, result) in join_all(pushes).await {
            match result {
                Ok(()) => {
                    self.metrics.sync_pushes.inc();
                    delivered += 1;
                }
                Err(e) => {
                    self.metrics.sync_push_failures.inc();
                    warn!(
                        peer = %peer.id,
                        file_id = %record.file_id,
                        error = %e,
                        "Metadata push failed, queued for retry"
                    );
                    self.enqueue(SyncTask {
                        target_master_id: peer.id.clone(),
                        payload: record.clone(),
                        attempts: 1,
                    });
                }
            }
        }
        debug!(file_id = %record.file_id, delivered, peers = peers.len(), "Metadata replicated");
        delivered
    }

    fn enqueue(&self, task: SyncTask) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(task.target_master_id.clone())
            .or_default()
            .push_back(task);
    }

    /// Retry every queued push once, per peer in FIFO order.
    pub async fn retry_cycle(&self) -> RetryReport {
        let drained: Vec<(String, Vec<SyncTask>)> = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            queues
                .iter_mut()
                .filter(|(_, queue)| !queue.is_empty())
                .map(|(peer, queue)| (peer.clone(), queue.drain(..).collect()))
                .collect()
        };
        if drained.is_empty() {
            return RetryReport::default();
        }

        let rounds = drained
            .into_iter()
            .map(|(peer, tasks)| async move {
                let address = self.book.address(&peer);
                let mut delivered = 0;
                let mut failed = Vec::new();
                for mut task in tasks {
                    let result = match address {
                        Some(address) => self.transport.push_record(address, &task.payload).await,
                        None => Err(Error::NotFound(format!("master {}", peer))),
                    };
                    match result {
                        Ok(()) => {
                            self.metrics.sync_pushes.inc();
                            delivered += 1;
                        }
                        Err(e) => {
                            self.metrics.sync_push_failures.inc();
                            debug!(
                                peer = %peer,
                                file_id = %task.payload.file_id,
                                attempts = task.attempts,
                                error = %e,
                                "Retry failed"
                            );
                            task.attempts += 1;
                            failed.push(task);
                        }
                    }
                }
                (peer, delivered, failed)
            });
        let results = join_all(rounds).await;

        let mut report = RetryReport::default();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        for (peer, delivered, failed) in results {
            report.delivered += delivered;
            let queue = queues.entry(peer.clone()).or_default();
            // entries queued while this cycle ran go behind the older failures
            let newer: Vec<SyncTask> = queue.drain(..).collect();
            queue.extend(failed);
            queue.extend(newer);

            if !queue.is_empty() {
                let lag = Error::ReplicationLag {
                    peer: peer.clone(),
                    pending: queue.len(),
                };
                warn!(peer = %peer, pending = queue.len(), "{}", lag);
            } else if delivered > 0 {
                info!(peer = %peer, delivered, "Replication caught up");
            }
            report.still_pending += queue.len();
        }
        report
    }

    /// Queue depth per peer (peers with nothing pending are omitted)
    pub fn pending(&self) -> BTreeMap<String, usize> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(peer, q)| (peer.clone(), q.len()))
            .collect()
    }

    pub fn pending_total(&self) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.values().map(VecDeque::len).sum()
    }

    /// Snapshot of the queue for one peer, oldest first
    pub fn queued(&self, peer_id: &str) -> Vec<SyncTask> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(peer_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pull a peer's full metadata and merge it last-writer-wins.
    /// Returns how many local records changed.
    pub async fn resync_from(&self, peer_id: &str) -> Result<usize> {
        let address = self
            .book
            .address(peer_id)
            .ok_or_else(|| Error::NotFound(format!("master {}", peer_id)))?;
        let records = self.transport.fetch_all_metadata(address).await?;
        let total = records.len();

        let mut merged = 0;
        for record in records {
            if let Err(e) = record.validate() {
                warn!(peer = %peer_id, file_id = %record.file_id, error = %e, "Skipping invalid record");
                continue;
            }
            if self.store.put_if_newer(&record)? {
                merged += 1;
            }
        }
        info!(peer = %peer_id, received = total, merged, "Metadata resync complete");
        Ok(merged)
    }
}
