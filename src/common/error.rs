//! Error types for minidfs

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    // === Leadership Errors ===
    #[error("Not leader: current leader is {}", .leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    // === Placement Errors ===
    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    #[error("Placement of {chunk_id} on {worker_id} failed: {reason}")]
    Placement {
        chunk_id: String,
        worker_id: String,
        reason: String,
    },

    #[error("No active worker holds {0}")]
    NoActiveReplica(String),

    // === Network Errors ===
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // === Replication ===
    #[error("Replication to {peer} lagging: {pending} update(s) pending")]
    ReplicationLag { peer: String, pending: usize },

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable tag used in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::NotFound(_) => "not_found",
            Error::NotLeader { .. } => "not_leader",
            Error::InsufficientReplicas { .. } => "insufficient_replicas",
            Error::Placement { .. } => "placement",
            Error::NoActiveReplica(_) => "no_active_replica",
            Error::PeerUnreachable(_) => "peer_unreachable",
            Error::Http(_) => "http",
            Error::ReplicationLag { .. } => "replication_lag",
            Error::RocksDb(_) | Error::MetadataCorrupted(_) => "storage",
            Error::InvalidRecord(_) => "invalid_record",
            Error::InvalidConfig(_) | Error::Config(_) => "invalid_config",
            Error::Internal(_) => "internal",
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            // not 5xx: the client must re-resolve the leader
            Error::NotLeader { .. } => StatusCode::FORBIDDEN,
            Error::InvalidRecord(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientReplicas { .. } | Error::NoActiveReplica(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::PeerUnreachable(_) | Error::Placement { .. } | Error::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let Error::NotLeader { leader } = &self {
            body["leader"] = json!(leader);
        }
        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::PeerUnreachable(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::MetadataCorrupted(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_is_distinct_from_transient() {
        let err = Error::NotLeader {
            leader: Some("master_3".into()),
        };
        assert_eq!(err.to_http_status(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("master_3"));

        let transient = Error::PeerUnreachable("timeout".into());
        assert_ne!(transient.to_http_status(), err.to_http_status());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::NotFound("f1".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::InsufficientReplicas {
                needed: 3,
                available: 2
            }
            .to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(Error::MetadataCorrupted("x".into()).kind(), "storage");
    }
}
