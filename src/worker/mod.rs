//! Worker node
//!
//! A plain chunk store: raw byte blobs on local disk behind
//! `/chunks/:chunk_id`, plus a heartbeat to every master.

pub mod heartbeat;
pub mod http;
pub mod server;
pub mod store;

pub use server::WorkerServer;
pub use store::ChunkDirectory;
