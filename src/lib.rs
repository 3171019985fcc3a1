//! # minidfs
//!
//! A toy distributed file store:
//! - Files are split into fixed-size chunks replicated across workers
//! - A static set of masters elects a leader with the Bully algorithm
//! - Only the leader places chunks and commits metadata
//! - Committed metadata is pushed to the other masters best effort
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Master cluster                  │
//! │  master_1    master_2    master_3 (leader)   │
//! │      ▲           ▲            │              │
//! │      └─ sync_metadata ────────┘              │
//! └───────────────────────┬──────────────────────┘
//!          heartbeats ▲   │ chunk pushes
//!   ┌─────────────────┴───▼──┬──────────────┐
//! ┌─┴──────────┐   ┌─────────┴──┐   ┌───────┴──────┐
//! │ worker_1   │   │ worker_2   │   │ worker_3     │
//! │ chunks/    │   │ chunks/    │   │ chunks/      │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a master
//! ```bash
//! minidfs-master serve \
//!   --id master_3 \
//!   --bind 0.0.0.0:5003 \
//!   --db ./master-3 \
//!   --cluster master_1=http://10.0.0.1:5001,master_2=http://10.0.0.2:5002,master_3=http://10.0.0.3:5003
//! ```
//!
//! ### Start a worker
//! ```bash
//! minidfs-worker serve \
//!   --id worker_1 \
//!   --bind 0.0.0.0:6001 \
//!   --advertise http://10.0.0.11:6001 \
//!   --data ./worker-1 \
//!   --masters master_1=http://10.0.0.1:5001,master_2=http://10.0.0.2:5002,master_3=http://10.0.0.3:5003
//! ```
//!
//! ### Upload a file (to the leader)
//! ```bash
//! curl -X POST --data-binary @report.pdf 'http://10.0.0.3:5003/files?name=report.pdf'
//! ```

pub mod common;
pub mod master;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use master::Master;
pub use worker::WorkerServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
