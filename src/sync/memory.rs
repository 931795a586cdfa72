//! In-process RemoteStore.
//!
//! Implements the same optimistic-concurrency contract as the GitHub client.
//! Backs the unit and integration tests, where `put` plays the part of another
//! device writing to the repository.

use crate::error::{SyncError, SyncResult};
use crate::storage::fs::sha256_hex;
use crate::sync::remote::{RemoteEntry, RemoteFile, RemoteStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Failure the memory remote should simulate on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    Api,
    Authentication,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    failure: Option<SimulatedFailure>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    writes: AtomicUsize,
}

/// Git-blob style content token.
pub fn blob_token(content: &[u8]) -> String {
    let mut data = format!("blob {}\0", content.len()).into_bytes();
    data.extend_from_slice(content);
    sha256_hex(&data)
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write directly, bypassing token checks. Returns the new token.
    pub fn put(&self, path: &str, content: impl Into<Vec<u8>>) -> String {
        let content = content.into();
        let token = blob_token(&content);
        self.lock().files.insert(path.to_string(), content);
        token
    }

    /// Delete directly, bypassing token checks.
    pub fn remove(&self, path: &str) -> bool {
        self.lock().files.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    /// Number of accepted writes and deletes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failure(&self, failure: Option<SimulatedFailure>) {
        self.lock().failure = failure;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(state: &MemoryState) -> SyncResult<()> {
        match state.failure {
            None => Ok(()),
            Some(SimulatedFailure::Api) => Err(SyncError::api("simulated server error")),
            Some(SimulatedFailure::Authentication) => Err(SyncError::Authentication(
                "simulated bad credentials".into(),
            )),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_files(&self, dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let state = self.lock();
        Self::check_failure(&state)?;

        let prefix = format!("{}/", dir.trim_matches('/'));
        Ok(state
            .files
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(path, content)| RemoteEntry {
                path: path.clone(),
                token: blob_token(content),
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> SyncResult<RemoteFile> {
        let state = self.lock();
        Self::check_failure(&state)?;

        let content = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(RemoteFile {
            path: path.to_string(),
            token: blob_token(&content),
            content,
        })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        expected_token: Option<&str>,
    ) -> SyncResult<String> {
        let mut state = self.lock();
        Self::check_failure(&state)?;

        let current = state.files.get(path).map(|c| blob_token(c));
        if current.as_deref() != expected_token {
            return Err(SyncError::conflict(path));
        }

        state.files.insert(path.to_string(), content.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(blob_token(content))
    }

    async fn delete_file(&self, path: &str, expected_token: &str) -> SyncResult<()> {
        let mut state = self.lock();
        Self::check_failure(&state)?;

        match state.files.get(path).map(|c| blob_token(c)) {
            None => Err(SyncError::NotFound(path.to_string())),
            Some(current) if current != expected_token => Err(SyncError::conflict(path)),
            Some(_) => {
                state.files.remove(path);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn initialize_empty_repository(&self) -> SyncResult<()> {
        let mut state = self.lock();
        Self::check_failure(&state)?;
        state
            .files
            .entry("README.md".to_string())
            .or_insert_with(|| b"# Notes\n".to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_requires_matching_token() {
        let remote = MemoryRemote::new();
        let t1 = remote.write_file("notes/a.md", b"one", None).await.unwrap();

        let err = remote.write_file("notes/a.md", b"two", None).await.unwrap_err();
        assert!(err.is_conflict());

        let t2 = remote
            .write_file("notes/a.md", b"two", Some(&t1))
            .await
            .unwrap();
        assert_ne!(t1, t2);

        let stale = remote.write_file("notes/a.md", b"three", Some(&t1)).await;
        assert!(stale.unwrap_err().is_conflict());
        assert_eq!(remote.write_count(), 2);
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_ordered() {
        let remote = MemoryRemote::new();
        remote.put("notes/b.md", "b");
        remote.put("notes/a.md", "a");
        remote.put("notes/deep/c.md", "c");
        remote.put("README.md", "readme");

        let paths: Vec<_> = remote
            .list_files("notes")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["notes/a.md", "notes/b.md"]);
        assert!(remote.list_files("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_init_idempotent() {
        let remote = MemoryRemote::new();
        let token = remote.put("notes/a.md", "a");
        assert!(remote.delete_file("notes/a.md", "stale").await.unwrap_err().is_conflict());
        remote.delete_file("notes/a.md", &token).await.unwrap();
        assert!(matches!(
            remote.read_file("notes/a.md").await,
            Err(SyncError::NotFound(_))
        ));

        remote.initialize_empty_repository().await.unwrap();
        remote.initialize_empty_repository().await.unwrap();
        assert_eq!(remote.file_count(), 1);
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let remote = MemoryRemote::new();
        remote.set_failure(Some(SimulatedFailure::Authentication));
        let err = remote.list_files("notes").await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
        remote.set_failure(None);
        assert!(remote.list_files("notes").await.is_ok());
    }
}
