//! Sync ledger - per-note replication bookkeeping (sync_state.json).
//!
//! Owned by the coordinator and never touched by anyone else. Survives
//! restarts so version tokens and held conflicts are not forgotten.

use crate::error::SyncResult;
use crate::models::{Note, NoteId};
use crate::storage::fs::{read_json_or_default, write_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Ledger key for the aggregate document.
pub const DOCUMENT_KEY: &str = "@document";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Last-known remote version; sent as the expected token on write.
    #[serde(default)]
    pub token: Option<String>,
    /// SHA-256 of the last encoding the remote accepted.
    #[serde(default)]
    pub digest: Option<String>,
    /// Last remote token seen by pull, including ones that failed to decode.
    #[serde(default)]
    pub observed: Option<String>,
    /// Intent sequence held back after a conflict.
    #[serde(default)]
    pub held_seq: Option<u64>,
    /// Remote version that caused the conflict.
    #[serde(default)]
    pub conflict: Option<Note>,
}

impl LedgerEntry {
    /// The remote already has `token`; nothing to fetch.
    pub fn knows(&self, token: &str) -> bool {
        self.token.as_deref() == Some(token) || self.observed.as_deref() == Some(token)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    entries: BTreeMap<String, LedgerEntry>,
}

pub struct SyncLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl SyncLedger {
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file: LedgerFile = read_json_or_default(&path).await;
        Self {
            path,
            entries: file.entries,
        }
    }

    pub fn get(&self, id: &NoteId) -> Option<&LedgerEntry> {
        self.entries.get(id.as_str())
    }

    pub fn get_key(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    /// Note ids with a known remote version.
    pub fn tracked_notes(&self) -> Vec<NoteId> {
        self.entries
            .iter()
            .filter(|(key, entry)| key.as_str() != DOCUMENT_KEY && entry.token.is_some())
            .map(|(key, _)| NoteId::from_string(key.clone()))
            .collect()
    }

    /// Mutate one entry (created on demand) and persist.
    pub async fn update<F>(&mut self, key: &str, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut LedgerEntry),
    {
        let mut next = self.entries.clone();
        let entry = next.entry(key.to_string()).or_default();
        f(entry);
        if *entry == LedgerEntry::default() {
            next.remove(key);
        }
        self.replace(next).await
    }

    pub async fn remove(&mut self, key: &str) -> SyncResult<()> {
        if !self.entries.contains_key(key) {
            return Ok(());
        }
        let mut next = self.entries.clone();
        next.remove(key);
        self.replace(next).await
    }

    async fn replace(&mut self, entries: BTreeMap<String, LedgerEntry>) -> SyncResult<()> {
        let file = LedgerFile { entries };
        write_json(&self.path, &file).await?;
        self.entries = file.entries;
        Ok(())
    }
}
