//! Aggregate document publishing.
//!
//! The document (weekly digest) lives at one path and is replaced whole.
//! Writes use the same token discipline as notes, and a stale token surfaces
//! as `SyncError::Conflict` instead of overwriting someone else's publish.

use crate::error::{SyncError, SyncResult};
use crate::storage::fs::sha256_hex;
use crate::sync::coordinator::SyncCoordinator;
use crate::sync::ledger::DOCUMENT_KEY;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Remote already holds this exact content
    Unchanged,
}

impl SyncCoordinator {
    /// Write the aggregate document against the last token we saw.
    pub async fn publish_document(&self, content: &str) -> SyncResult<PublishOutcome> {
        let guard = self.cycle.lock().await;
        let result = self.publish_locked(content).await;
        self.release_cycle(guard).await;
        result
    }

    async fn publish_locked(&self, content: &str) -> SyncResult<PublishOutcome> {
        self.ensure_ready().await?;

        let path = self.layout.document_path.clone();
        let entry = self
            .ledger
            .lock()
            .await
            .get_key(DOCUMENT_KEY)
            .cloned()
            .unwrap_or_default();
        let digest = sha256_hex(content.as_bytes());

        if entry.token.is_some() && entry.digest.as_deref() == Some(digest.as_str()) {
            return Ok(PublishOutcome::Unchanged);
        }

        let token = self
            .remote
            .write_file(&path, content.as_bytes(), entry.token.as_deref())
            .await?;
        self.ledger
            .lock()
            .await
            .update(DOCUMENT_KEY, |e| {
                e.token = Some(token);
                e.digest = Some(digest);
            })
            .await?;

        info!("[Sync] Published {}", path);
        Ok(PublishOutcome::Published)
    }

    /// Read the current document and adopt its token. `None` if absent.
    pub async fn fetch_document(&self) -> SyncResult<Option<String>> {
        let guard = self.cycle.lock().await;
        let result = self.fetch_locked().await;
        self.release_cycle(guard).await;
        result
    }

    async fn fetch_locked(&self) -> SyncResult<Option<String>> {
        self.ensure_ready().await?;

        let file = match self.remote.read_file(&self.layout.document_path).await {
            Ok(file) => file,
            Err(SyncError::NotFound(_)) => {
                self.ledger.lock().await.remove(DOCUMENT_KEY).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let digest = sha256_hex(&file.content);
        let text = String::from_utf8(file.content)
            .map_err(|e| SyncError::decoding(format!("Document is not UTF-8: {}", e)))?;
        self.ledger
            .lock()
            .await
            .update(DOCUMENT_KEY, |e| {
                e.token = Some(file.token);
                e.digest = Some(digest);
            })
            .await?;
        Ok(Some(text))
    }
}
