//! Sync module - Replicates the local note store to a GitHub repository.
//!
//! This module contains:
//! - RemoteStore trait with GitHub and in-memory backends
//! - Credential storage (keyring, file, memory)
//! - Network reachability monitor and auto-sync driver
//! - SyncCoordinator (push/pull cycles, conflicts, document publishing)

pub mod auto;
pub mod background;
pub mod codec;
pub mod coordinator;
pub mod credentials;
pub mod document;
pub mod github;
pub mod ledger;
pub mod memory;
pub mod network;
pub mod remote;

pub use auto::AutoSync;
pub use background::BackgroundExecutor;
pub use coordinator::{
    ConfigurationStatus, Resolution, SyncComponents, SyncCoordinator, SyncPhase, SyncReport,
};
pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
};
pub use document::PublishOutcome;
pub use github::{GitHubRemote, GitHubTarget};
pub use memory::MemoryRemote;
pub use network::NetworkMonitor;
pub use remote::{RemoteEntry, RemoteFile, RemoteLayout, RemoteStore};
