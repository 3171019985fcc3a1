//! Metadata store using RocksDB
//!
//! Stores:
//! - File records (file_id → chunks, replicas, timestamps)
//! - Worker table (worker_id → address, status, last heartbeat)
//! - Node configuration (election term)

use crate::common::{validate_id, Error, Result};
use rocksdb::{ColumnFamily, IteratorMode, Options, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const CF_FILES: &str = "files";
const CF_WORKERS: &str = "workers";
const CF_CONFIG: &str = "config";

/// Build the id of the `index`-th chunk (1-based) of a file
pub fn chunk_id(file_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", file_id, index)
}

/// One chunk of a file and the workers holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub size: u64,
    #[serde(alias = "worker_ids")]
    pub replica_worker_ids: Vec<String>,
    #[serde(default)]
    pub blake3: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Active,
    Deleted,
}

/// File record
///
/// Serialized with a `status` field derived from `deleted_at`; an incoming
/// `status` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredFileRecord", from = "StoredFileRecord")]
pub struct FileRecord {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
    pub chunks: Vec<ChunkRecord>,
    pub created_at: u64,
    pub updated_at: u64,
    pub deleted_at: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct StoredFileRecord {
    file_id: String,
    file_name: String,
    size: u64,
    chunks: Vec<ChunkRecord>,
    created_at: u64,
    updated_at: u64,
    #[serde(default)]
    deleted_at: Option<u64>,
    #[serde(default)]
    status: FileStatus,
}

impl From<FileRecord> for StoredFileRecord {
    fn from(record: FileRecord) -> Self {
        let status = record.status();
        Self {
            file_id: record.file_id,
            file_name: record.file_name,
            size: record.size,
            chunks: record.chunks,
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
            status,
        }
    }
}

impl From<StoredFileRecord> for FileRecord {
    fn from(stored: StoredFileRecord) -> Self {
        Self {
            file_id: stored.file_id,
            file_name: stored.file_name,
            size: stored.size,
            chunks: stored.chunks,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            deleted_at: stored.deleted_at,
        }
    }
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn status(&self) -> FileStatus {
        if self.is_deleted() {
            FileStatus::Deleted
        } else {
            FileStatus::Active
        }
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }

    /// Reject records that could not have come from a well-behaved master:
    /// bad ids, duplicate chunk ids, or a worker listed twice for one chunk.
    pub fn validate(&self) -> Result<()> {
        validate_id("file_id", &self.file_id)?;
        if self.file_name.is_empty() {
            return Err(Error::InvalidRecord("file_name is empty".into()));
        }

        let mut seen = HashSet::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            validate_id("chunk_id", &chunk.chunk_id)?;
            if !seen.insert(chunk.chunk_id.as_str()) {
                return Err(Error::InvalidRecord(format!(
                    "duplicate chunk_id '{}' in file {}",
                    chunk.chunk_id, self.file_id
                )));
            }
            let mut replicas = HashSet::with_capacity(chunk.replica_worker_ids.len());
            for worker_id in &chunk.replica_worker_ids {
                if !replicas.insert(worker_id.as_str()) {
                    return Err(Error::InvalidRecord(format!(
                        "worker '{}' listed twice for {}",
                        worker_id, chunk.chunk_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Last-writer-wins ordering used when merging records from peers.
    /// On equal `updated_at` a tombstone wins over a live record.
    pub fn supersedes(&self, existing: &FileRecord) -> bool {
        match self.updated_at.cmp(&existing.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.is_deleted() || !existing.is_deleted(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Inactive,
}

/// Worker table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub worker_id: String,
    pub address: String,
    pub status: WorkerStatus,
    /// Unix millis of the last accepted heartbeat
    pub last_heartbeat: u64,
}

impl WorkerNode {
    pub fn is_active(&self) -> bool {
        self.status == WorkerStatus::Active
    }
}

/// Metadata store
///
/// One RocksDB handle per master. Every write goes through `write_lock` so
/// read-modify-write paths (`put_if_newer`, `soft_delete`) are atomic.
pub struct MetadataStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_FILES, CF_WORKERS, CF_CONFIG])?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::MetadataCorrupted(format!("missing column family '{}'", name)))
    }

    fn sync_writes() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    fn read_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let cf = self.cf(CF_FILES)?;
        match self.db.get_cf(cf, file_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_file(&self, record: &FileRecord) -> Result<()> {
        let cf = self.cf(CF_FILES)?;
        let value = bincode::serialize(record)?;
        self.db
            .put_cf_opt(cf, record.file_id.as_bytes(), value, &Self::sync_writes())?;
        Ok(())
    }

    // === File operations ===

    /// Insert or replace a file record
    pub fn put(&self, record: &FileRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_file(record)
    }

    /// Store `record` unless the local copy is newer. Returns whether it was written.
    pub fn put_if_newer(&self, record: &FileRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.read_file(&record.file_id)? {
            if !record.supersedes(&existing) {
                return Ok(false);
            }
        }
        self.write_file(record)?;
        Ok(true)
    }

    /// Get a file record, deleted or not
    pub fn get(&self, file_id: &str) -> Result<FileRecord> {
        self.read_file(file_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))
    }

    pub fn find(&self, file_id: &str) -> Result<Option<FileRecord>> {
        self.read_file(file_id)
    }

    /// Mark a record deleted at `now`. A record that is already deleted keeps
    /// its original `deleted_at`.
    pub fn soft_delete(&self, file_id: &str, now: u64) -> Result<FileRecord> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self
            .read_file(file_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
        if record.deleted_at.is_none() {
            record.deleted_at = Some(now);
            self.write_file(&record)?;
        }
        Ok(record)
    }

    /// Snapshot of every file record, ordered by file_id
    pub fn list_all(&self, include_deleted: bool) -> Result<Vec<FileRecord>> {
        let cf = self.cf(CF_FILES)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: FileRecord = bincode::deserialize(&value)?;
            if include_deleted || !record.is_deleted() {
                records.push(record);
            }
        }
        Ok(records)
    }

    // === Worker operations ===

    pub fn put_worker(&self, worker: &WorkerNode) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cf = self.cf(CF_WORKERS)?;
        let value = bincode::serialize(worker)?;
        self.db
            .put_cf_opt(cf, worker.worker_id.as_bytes(), value, &Self::sync_writes())?;
        Ok(())
    }

    pub fn list_workers(&self) -> Result<Vec<WorkerNode>> {
        let cf = self.cf(CF_WORKERS)?;
        let mut workers = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            workers.push(bincode::deserialize(&value)?);
        }
        Ok(workers)
    }

    // === Config operations ===

    /// Put config value
    pub fn put_config(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cf = self.cf(CF_CONFIG)?;
        self.db
            .put_cf_opt(cf, key.as_bytes(), value, &Self::sync_writes())?;
        Ok(())
    }

    /// Get config value
    pub fn get_config(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(CF_CONFIG)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
