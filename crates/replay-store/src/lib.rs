//! Replay Artifact Store
//!
//! Two views per artifact kind: a last-slot file that is atomically
//! replaced, and an append-only NDJSON history that is never rewritten.
//!
//! # Example
//!
//! ```rust,no_run
//! use replay_artifact::ArtifactKind;
//! use replay_store::{ArtifactStore, FsArtifactStore};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), replay_store::StoreError> {
//! let store = FsArtifactStore::open("artifacts")?;
//! let request = json!({"kind": "execution_request", "task_id": "T-1"});
//! store.write_last(ArtifactKind::ExecutionRequest, &request)?;
//! store.append(ArtifactKind::ExecutionRequest, &request)?;
//!
//! let snapshot = store.read_history(ArtifactKind::ExecutionRequest)?.read_all();
//! println!("{} records, {} skipped", snapshot.entries.len(), snapshot.skipped);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

mod error;
mod history;
mod store;

pub use error::{StoreError, StoreResult};
pub use history::{History, HistoryEntry, HistorySnapshot};
pub use store::{ArtifactStore, FsArtifactStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
