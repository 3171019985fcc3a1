//! Chunk storage on local disk
//!
//! Layout: `<root>/<aa>/<encoded chunk id>.chunk`, where `aa` is the first
//! byte of the BLAKE3 hash of the id in hex. Writes go to a temp file that
//! is fsynced and renamed into place, so a chunk is either fully present or
//! absent.

use crate::common::{blake3_hash, encode_name, validate_id, Error, Result};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const CHUNK_EXT: &str = "chunk";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreUsage {
    pub chunks: usize,
    pub bytes: u64,
}

pub struct ChunkDirectory {
    root: PathBuf,
}

impl ChunkDirectory {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        let prefix = &blake3_hash(chunk_id.as_bytes())[..2];
        self.root
            .join(prefix)
            .join(format!("{}.{}", encode_name(chunk_id), CHUNK_EXT))
    }

    /// Store a chunk, replacing any previous copy. When `expected_blake3` is
    /// given the data must hash to it.
    pub async fn put(&self, chunk_id: &str, data: &[u8], expected_blake3: Option<&str>) -> Result<()> {
        validate_id("chunk_id", chunk_id)?;
        if let Some(expected) = expected_blake3 {
            let actual = blake3_hash(data);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::InvalidRecord(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    chunk_id, expected, actual
                )));
            }
        }

        let path = self.chunk_path(chunk_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // one temp file per write; concurrent puts of the same id race only on rename
        let tmp = path.with_extension(format!("{}.{}.tmp", CHUNK_EXT, Uuid::new_v4().simple()));
        if let Err(e) = write_synced(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::rename(&tmp, &path).await?;
        tracing::debug!(chunk_id, bytes = data.len(), "Chunk stored");
        Ok(())
    }

    pub async fn get(&self, chunk_id: &str) -> Result<Bytes> {
        validate_id("chunk_id", chunk_id)?;
        match fs::read(self.chunk_path(chunk_id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("chunk {}", chunk_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, chunk_id: &str) -> Result<()> {
        validate_id("chunk_id", chunk_id)?;
        match fs::remove_file(self.chunk_path(chunk_id)).await {
            Ok(()) => {
                tracing::debug!(chunk_id, "Chunk deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("chunk {}", chunk_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        fs::try_exists(self.chunk_path(chunk_id))
            .await
            .unwrap_or(false)
    }

    /// Count stored chunks and their total size
    pub async fn usage(&self) -> Result<StoreUsage> {
        let mut usage = StoreUsage::default();
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_EXT) {
                    continue;
                }
                usage.chunks += 1;
                usage.bytes += entry.metadata().await?.len();
            }
        }
        Ok(usage)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}
