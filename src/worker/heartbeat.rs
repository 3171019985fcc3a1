//! Worker heartbeats
//!
//! A worker reports to every configured master, not just the leader, so a
//! newly elected leader already knows the live workers.

use crate::common::{encode_name, Error, MasterNode, Result};
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

pub struct HeartbeatSender {
    http: Client,
    worker_id: String,
    advertise_url: String,
    masters: Vec<MasterNode>,
}

impl HeartbeatSender {
    pub fn new(
        worker_id: String,
        advertise_url: String,
        masters: Vec<MasterNode>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            worker_id,
            advertise_url,
            masters,
        })
    }

    async fn send_one(&self, master: &MasterNode) -> Result<()> {
        let url = format!(
            "{}/heartbeat/{}",
            master.address,
            encode_name(&self.worker_id)
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({ "url": self.advertise_url }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("POST {} returned {}", url, response.status())));
        }
        Ok(())
    }

    /// Send one heartbeat to every master. Returns how many acknowledged.
    pub async fn beat(&self) -> usize {
        let sends = self.masters.iter().map(|master| async move {
            let result = self.send_one(master).await;
            if let Err(e) = &result {
                tracing::debug!(master = %master.id, error = %e, "Heartbeat not delivered");
            }
            result.is_ok()
        });
        let acked = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        if acked == 0 && !self.masters.is_empty() {
            tracing::warn!(worker_id = %self.worker_id, "No master acknowledged heartbeat");
        }
        acked
    }
}
