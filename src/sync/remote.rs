//! RemoteStore trait - Abstraction over the branch-scoped remote file tree.
//!
//! Every write carries the version token the writer last saw; the store
//! rejects it with `SyncError::Conflict` if the file moved on. Clients never
//! retry internally, retry policy belongs to the coordinator.

use crate::error::SyncResult;
use crate::models::NoteId;
use async_trait::async_trait;

/// Listing entry: a path and its current version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub token: String,
}

/// File content plus the token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: Vec<u8>,
    pub token: String,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Backend name for logs and status output.
    fn name(&self) -> &'static str;

    /// Files directly under `dir`, ordered by path. A missing directory is empty.
    async fn list_files(&self, dir: &str) -> SyncResult<Vec<RemoteEntry>>;

    async fn read_file(&self, path: &str) -> SyncResult<RemoteFile>;

    /// Create or replace `path`. `expected_token` must equal the current token
    /// (`None` means the file must not exist yet). Returns the new token.
    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        expected_token: Option<&str>,
    ) -> SyncResult<String>;

    /// Delete `path` if its current token equals `expected_token`.
    async fn delete_file(&self, path: &str, expected_token: &str) -> SyncResult<()>;

    /// Bootstrap an empty remote target. Safe to call repeatedly.
    async fn initialize_empty_repository(&self) -> SyncResult<()>;
}

/// Deterministic remote paths for notes and the aggregate document.
#[derive(Debug, Clone)]
pub struct RemoteLayout {
    pub notes_dir: String,
    pub document_path: String,
}

impl RemoteLayout {
    pub fn new(notes_dir: impl Into<String>, document_path: impl Into<String>) -> Self {
        Self {
            notes_dir: notes_dir.into().trim_matches('/').to_string(),
            document_path: document_path.into().trim_matches('/').to_string(),
        }
    }

    pub fn note_path(&self, id: &NoteId) -> String {
        format!("{}/{}.md", self.notes_dir, id)
    }

    /// Inverse of `note_path`; `None` for anything that is not a note file.
    pub fn note_id_for(&self, path: &str) -> Option<NoteId> {
        let rest = path.strip_prefix(&self.notes_dir)?.strip_prefix('/')?;
        let stem = rest.strip_suffix(".md")?;
        let id = NoteId::from_string(stem);
        id.is_path_safe().then_some(id)
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("notes", "releases/weekly.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_path_round_trip() {
        let layout = RemoteLayout::new("/notes/", "releases/weekly.md");
        let id = NoteId::from_string("abc-123");
        let path = layout.note_path(&id);
        assert_eq!(path, "notes/abc-123.md");
        assert_eq!(layout.note_id_for(&path), Some(id));
    }

    #[test]
    fn test_note_id_for_rejects_foreign_paths() {
        let layout = RemoteLayout::default();
        assert_eq!(layout.note_id_for("README.md"), None);
        assert_eq!(layout.note_id_for("notes/abc.txt"), None);
        assert_eq!(layout.note_id_for("notes/sub/abc.md"), None);
        assert_eq!(layout.note_id_for("notesx/abc.md"), None);
    }
}
