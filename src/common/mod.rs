//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod metrics;
pub mod periodic;
pub mod tracing_middleware;
pub mod utils;

pub use config::{AddressBook, Config, MasterConfig, MasterNode, WorkerConfig};
pub use error::{Error, Result};
pub use metrics::{ClusterGauges, MetricsRegistry};
pub use utils::{
    blake3_hash, encode_name, format_bytes, timestamp_now_millis, validate_id,
};
