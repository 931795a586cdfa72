//! Error types for the sync engine.
//!
//! Local edits never surface these; they show up as per-note sync status.
//! Only the manual `push`/`pull` entry points return them to the caller.

use thiserror::Error;

/// Result alias used across storage and sync.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing, revoked or rejected credential. Needs user action, never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote API failure (rate limit, server error, transport). Retried next cycle.
    #[error("API error: {0}")]
    Api(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote content could not be decoded. Not retried for that file.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Expected version token did not match the remote one.
    #[error("Version conflict at {path}")]
    Conflict { path: String },

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn api(message: impl Into<String>) -> Self {
        SyncError::Api(message.into())
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        SyncError::Decoding(message.into())
    }

    pub fn conflict(path: impl Into<String>) -> Self {
        SyncError::Conflict { path: path.into() }
    }

    /// Errors worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Api(_) | SyncError::NotFound(_) | SyncError::NetworkUnavailable | SyncError::Io(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// Errors that make the whole operation pointless (no credential, no network).
    pub fn aborts_operation(&self) -> bool {
        matches!(
            self,
            SyncError::Authentication(_) | SyncError::NetworkUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SyncError::api("rate limited").is_transient());
        assert!(SyncError::NotFound("notes/a.md".into()).is_transient());
        assert!(!SyncError::decoding("bad front matter").is_transient());
        assert!(!SyncError::Authentication("no token".into()).is_transient());
        assert!(SyncError::conflict("notes/a.md").is_conflict());
        assert!(SyncError::NetworkUnavailable.aborts_operation());
        assert!(!SyncError::api("boom").aborts_operation());
    }

    #[test]
    fn test_display() {
        let err = SyncError::conflict("notes/a.md");
        assert_eq!(err.to_string(), "Version conflict at notes/a.md");
    }
}
