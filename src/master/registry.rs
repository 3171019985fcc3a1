//! Worker registry
//!
//! Tracks worker liveness from heartbeats. Workers are created on their
//! first heartbeat and never removed; the sweep only flips them inactive.

use crate::common::{timestamp_now_millis, validate_id, Error, Result};
use crate::master::metadata::{MetadataStore, WorkerNode, WorkerStatus};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerNode>>,
    timeout: Duration,
    store: Option<Arc<MetadataStore>>,
}

impl WorkerRegistry {
    /// In-memory registry
    pub fn new(timeout: Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            timeout,
            store: None,
        }
    }

    /// Registry backed by the worker table of `store`
    pub fn with_store(timeout: Duration, store: Arc<MetadataStore>) -> Result<Self> {
        let registry = Self {
            workers: RwLock::new(HashMap::new()),
            timeout,
            store: Some(store),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Reload the worker table from disk. Returns the number of workers known.
    pub fn load(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.list_workers()?;
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        for worker in persisted {
            workers.insert(worker.worker_id.clone(), worker);
        }
        Ok(workers.len())
    }

    pub fn heartbeat(&self, worker_id: &str, address: &str) -> Result<WorkerNode> {
        self.heartbeat_at(worker_id, address, timestamp_now_millis())
    }

    pub fn heartbeat_at(&self, worker_id: &str, address: &str, now: u64) -> Result<WorkerNode> {
        validate_id("worker_id", worker_id)?;
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "heartbeat from {} carries no address",
                worker_id
            )));
        }

        let node = WorkerNode {
            worker_id: worker_id.to_string(),
            address: address.to_string(),
            status: WorkerStatus::Active,
            last_heartbeat: now,
        };

        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = &self.store {
            store.put_worker(&node)?;
        }
        match workers.insert(worker_id.to_string(), node.clone()) {
            None => info!(worker_id, address, "Worker registered"),
            Some(prev) if !prev.is_active() => info!(worker_id, address, "Worker back online"),
            Some(prev) if prev.address != node.address => {
                info!(worker_id, old = %prev.address, new = %node.address, "Worker address changed")
            }
            Some(_) => {}
        }
        Ok(node)
    }

    /// Flip every active worker whose last heartbeat is older than the timeout.
    /// Returns the ids that changed.
    pub fn sweep(&self) -> Result<Vec<String>> {
        self.sweep_at(timestamp_now_millis())
    }

    pub fn sweep_at(&self, now: u64) -> Result<Vec<String>> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);

        let mut flipped = Vec::new();
        for node in workers.values_mut() {
            if node.is_active() && now.saturating_sub(node.last_heartbeat) > timeout_ms {
                let mut updated = node.clone();
                updated.status = WorkerStatus::Inactive;
                if let Some(store) = &self.store {
                    store.put_worker(&updated)?;
                }
                warn!(
                    worker_id = %node.worker_id,
                    silent_ms = now.saturating_sub(node.last_heartbeat),
                    "Worker marked inactive"
                );
                *node = updated;
                flipped.push(node.worker_id.clone());
            }
        }
        flipped.sort();
        Ok(flipped)
    }

    /// Active workers, ordered by id
    pub fn list_active(&self) -> Vec<WorkerNode> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<WorkerNode> = workers.values().filter(|w| w.is_active()).cloned().collect();
        active.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        active
    }

    /// Every known worker, ordered by id
    pub fn list_all(&self) -> Vec<WorkerNode> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<WorkerNode> = workers.values().cloned().collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerNode> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.get(worker_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.values().filter(|w| w.is_active()).count()
    }
}
