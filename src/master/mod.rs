//! Master node
//!
//! A master is responsible for:
//! - Leader election among the configured masters (Bully, with terms)
//! - Worker liveness from heartbeats
//! - Chunk placement and replication on upload (leader only)
//! - Durable file metadata, pushed to peer masters best effort

pub mod election;
pub mod http;
pub mod metadata;
pub mod peer_client;
pub mod placement;
pub mod registry;
pub mod replicator;
pub mod server;
pub mod state;
pub mod tasks;
pub mod worker_client;

pub use election::{LeaderElector, LeaderState, Role};
pub use metadata::{ChunkRecord, FileRecord, MetadataStore, WorkerNode, WorkerStatus};
pub use placement::ChunkPlacementEngine;
pub use registry::WorkerRegistry;
pub use replicator::{MetadataReplicator, SyncTask};
pub use server::Master;
pub use state::MasterState;
