//! Master-to-worker chunk transfer

use crate::common::{encode_name, Error, Result};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;

/// Header carrying the hex BLAKE3 digest of a pushed chunk
pub const CHUNK_CHECKSUM_HEADER: &str = "X-Chunk-Blake3";

/// The worker chunk-store contract as seen from the master.
pub trait ChunkStore: Send + Sync + 'static {
    /// Store `data` under `chunk_id` on the worker at `address`
    fn store_chunk(
        &self,
        address: &str,
        chunk_id: &str,
        data: Bytes,
        checksum: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_chunk(&self, address: &str, chunk_id: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub struct WorkerClient {
    http: Client,
}

impl WorkerClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http })
    }

    fn chunk_url(address: &str, chunk_id: &str) -> String {
        format!("{}/chunks/{}", address, encode_name(chunk_id))
    }
}

impl ChunkStore for WorkerClient {
    async fn store_chunk(
        &self,
        address: &str,
        chunk_id: &str,
        data: Bytes,
        checksum: &str,
    ) -> Result<()> {
        let url = Self::chunk_url(address, chunk_id);
        let response = self
            .http
            .post(&url)
            .header(CHUNK_CHECKSUM_HEADER, checksum)
            .body(data)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("POST {} returned {}: {}", url, status, body)));
        }
        Ok(())
    }

    async fn delete_chunk(&self, address: &str, chunk_id: &str) -> Result<()> {
        let url = format!("{}/delete", Self::chunk_url(address, chunk_id));
        let response = self.http.post(&url).send().await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("chunk {}", chunk_id))),
            s => Err(Error::Http(format!("POST {} returned {}", url, s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_url_encodes_id() {
        assert_eq!(
            WorkerClient::chunk_url("http://w1:6001", "f1_chunk_2"),
            "http://w1:6001/chunks/f1_chunk_2"
        );
        assert_eq!(
            WorkerClient::chunk_url("http://w1:6001", "a/b_chunk_1"),
            "http://w1:6001/chunks/a%2Fb_chunk_1"
        );
    }
}
