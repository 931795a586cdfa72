//! notesync - Offline-first note store with GitHub-backed sync.
//!
//! Notes are written to a local store first and replicated to a repository
//! in the background. Edits never wait on the network.

pub mod config;
pub mod error;
pub mod formatters;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use models::{Note, NoteId, SyncStatus};
pub use storage::{CommitQueue, NoteStore};
pub use sync::{SyncCoordinator, SyncReport};
