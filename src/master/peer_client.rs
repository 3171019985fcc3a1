//! Master-to-master HTTP client
//!
//! Every call is a single attempt bounded by a timeout; a peer that does not
//! answer in time is treated as dead for that round.

use crate::common::{Error, Result};
use crate::master::metadata::FileRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Answer to `GET /current_leader`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderView {
    pub leader: Option<String>,
    #[serde(default)]
    pub term: u64,
}

/// Body of `POST /leader`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAnnouncement {
    pub leader_id: String,
    #[serde(default)]
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementAck {
    pub accepted: bool,
    pub leader: Option<String>,
    pub term: u64,
}

/// Body of `POST /sync_metadata`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub record: FileRecord,
}

/// Body of `GET /all_metadata`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDump {
    pub records: Vec<FileRecord>,
}

/// Calls one master makes on another. `address` is the peer's base URL.
pub trait PeerTransport: Send + Sync + 'static {
    fn probe_alive(&self, address: &str) -> impl Future<Output = bool> + Send;

    fn current_leader(&self, address: &str) -> impl Future<Output = Result<LeaderView>> + Send;

    fn announce_leader(
        &self,
        address: &str,
        announcement: &LeaderAnnouncement,
    ) -> impl Future<Output = Result<AnnouncementAck>> + Send;

    fn push_record(
        &self,
        address: &str,
        record: &FileRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_all_metadata(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<FileRecord>>> + Send;
}

#[derive(Clone)]
pub struct PeerClient {
    http: Client,
    probe_timeout: Duration,
    push_timeout: Duration,
}

impl PeerClient {
    pub fn new(probe_timeout: Duration, push_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(probe_timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            probe_timeout,
            push_timeout,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        timeout: Duration,
    ) -> Result<T> {
        let response = self.http.get(&url).timeout(timeout).send().await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("GET {} returned {}", url, response.status())));
        }
        Ok(response.json().await?)
    }
}

impl PeerTransport for PeerClient {
    async fn probe_alive(&self, address: &str) -> bool {
        match self
            .http
            .get(format!("{}/alive", address))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn current_leader(&self, address: &str) -> Result<LeaderView> {
        self.get_json(format!("{}/current_leader", address), self.probe_timeout)
            .await
    }

    async fn announce_leader(
        &self,
        address: &str,
        announcement: &LeaderAnnouncement,
    ) -> Result<AnnouncementAck> {
        let url = format!("{}/leader", address);
        let response = self
            .http
            .post(&url)
            .timeout(self.probe_timeout)
            .json(announcement)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("POST {} returned {}", url, response.status())));
        }
        Ok(response.json().await?)
    }

    async fn push_record(&self, address: &str, record: &FileRecord) -> Result<()> {
        let url = format!("{}/sync_metadata", address);
        let response = self
            .http
            .post(&url)
            .timeout(self.push_timeout)
            .json(&SyncRequest {
                record: record.clone(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "POST {} for {} returned {}",
                url,
                record.file_id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_all_metadata(&self, address: &str) -> Result<Vec<FileRecord>> {
        let dump: MetadataDump = self
            .get_json(format!("{}/all_metadata", address), self.push_timeout)
            .await?;
        Ok(dump.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_view_defaults_term() {
        let view: LeaderView = serde_json::from_str(r#"{"leader":"master_3"}"#).unwrap();
        assert_eq!(view.leader.as_deref(), Some("master_3"));
        assert_eq!(view.term, 0);

        let none: LeaderView = serde_json::from_str(r#"{"leader":null,"term":2}"#).unwrap();
        assert!(none.leader.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_dead() {
        let client =
            PeerClient::new(Duration::from_millis(200), Duration::from_millis(200)).unwrap();
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };
        assert!(!client.probe_alive(&closed).await);
        let err = client.current_leader(&closed).await.unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }
}
