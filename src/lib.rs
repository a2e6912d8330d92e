pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod domains;
pub mod error;
pub mod frontier;
pub mod logging;
pub mod registry;
pub mod run_state;
pub mod server;
pub mod snapshot;
pub mod stores;
pub mod url_utils;
pub mod visited;

// Re-export main types for library usage
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigUpdate, CrawlConfig, WorkerConfig};
pub use coordinator::{ResultReport, RunCoordinator, WorkBatch, WorkItem};
pub use error::ApiError;
pub use frontier::{Frontier, QueuedUrl, RejectReason};
pub use registry::RunRegistry;
pub use run_state::{RunState, RunStatus};
pub use server::{router, spawn_maintenance_ticker, AppState};
pub use snapshot::SnapshotStore;
pub use stores::{BlobStore, FsBlobStore, PageMetadataStore, PageRecord, SledPageStore};
