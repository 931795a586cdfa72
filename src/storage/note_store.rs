//! NoteStore - the single owner of the local note collection.
//!
//! All reads and writes go through one async mutex, so edits from the UI and
//! merges from sync never interleave. Each mutation persists the whole
//! collection atomically before it becomes visible, then broadcasts a change.

use crate::error::SyncResult;
use crate::models::{Note, NoteId, SyncStatus};
use crate::storage::fs::{read_json_or_default, write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Change notification raised after every persisted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteChange {
    /// Local edit (create or update)
    Saved(NoteId),
    /// Remote content merged in by sync
    Merged(NoteId),
    Deleted(NoteId),
    StatusChanged(NoteId, SyncStatus),
}

/// The local state a merge was decided against. The merge is refused when
/// the store no longer matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBase {
    /// No local copy.
    Missing,
    /// A synced local copy at this `modified_at`.
    Clean(DateTime<Utc>),
    /// A local copy at this `modified_at`, whatever its status.
    Exact(DateTime<Utc>),
}

impl MergeBase {
    fn holds(&self, current: Option<&Note>) -> bool {
        match (self, current) {
            (MergeBase::Missing, None) => true,
            (MergeBase::Clean(at), Some(note)) => {
                note.modified_at == *at && note.sync_status == SyncStatus::Synced
            }
            (MergeBase::Exact(at), Some(note)) => note.modified_at == *at,
            _ => false,
        }
    }
}

/// On-disk layout of notes.json.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NoteFile {
    #[serde(default)]
    notes: Vec<Note>,
}

pub struct NoteStore {
    path: PathBuf,
    notes: Mutex<HashMap<NoteId, Note>>,
    changes: broadcast::Sender<NoteChange>,
}

impl NoteStore {
    /// Open the store at `path`. A missing or corrupt file yields an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file: NoteFile = read_json_or_default(&path).await;
        let notes = file
            .notes
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect::<HashMap<_, _>>();
        debug!("[NoteStore] Loaded {} notes from {:?}", notes.len(), path);

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            notes: Mutex::new(notes),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoteChange> {
        self.changes.subscribe()
    }

    /// All notes, newest first by creation time.
    pub async fn fetch_all(&self) -> Vec<Note> {
        let notes = self.notes.lock().await;
        sorted(notes.values().cloned().collect())
    }

    pub async fn fetch(&self, id: &NoteId) -> Option<Note> {
        self.notes.lock().await.get(id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.notes.lock().await.len()
    }

    /// Case-insensitive substring search over title, summary, body and tags.
    /// An empty query returns everything.
    pub async fn search(&self, query: &str) -> Vec<Note> {
        let needle = query.trim().to_lowercase();
        let notes = self.notes.lock().await;
        sorted(
            notes
                .values()
                .filter(|n| needle.is_empty() || n.matches(&needle))
                .cloned()
                .collect(),
        )
    }

    /// Upsert from a local edit: keeps the original creation time, bumps
    /// `modified_at` and marks the note pending. Returns the stored note.
    pub async fn save(&self, mut note: Note) -> SyncResult<Note> {
        let mut notes = self.notes.lock().await;

        match notes.get(&note.id) {
            Some(existing) => {
                note.created_at = existing.created_at;
                note.modified_at = Note::next_modified_at(existing.modified_at);
            }
            None => {
                note.modified_at = Note::next_modified_at(note.modified_at);
            }
        }
        note.sync_status = SyncStatus::Pending;

        let mut next = notes.clone();
        next.insert(note.id.clone(), note.clone());
        self.persist(&next).await?;
        *notes = next;
        drop(notes);

        self.notify(NoteChange::Saved(note.id.clone()));
        Ok(note)
    }

    /// Upsert from the sync merge path: stored exactly as given, no bump.
    /// Returns false, leaving the store untouched, when the local copy moved
    /// away from `base` (a local edit landed after the merge was decided).
    pub async fn merge(&self, note: Note, base: MergeBase) -> SyncResult<bool> {
        let mut notes = self.notes.lock().await;
        if !base.holds(notes.get(&note.id)) {
            debug!("[NoteStore] Merge of {} skipped, local copy changed", note.id);
            return Ok(false);
        }

        let mut next = notes.clone();
        let id = note.id.clone();
        next.insert(id.clone(), note);
        self.persist(&next).await?;
        *notes = next;
        drop(notes);

        self.notify(NoteChange::Merged(id));
        Ok(true)
    }

    /// Update only the sync status. Returns false when the note is gone.
    pub async fn set_status(&self, id: &NoteId, status: SyncStatus) -> SyncResult<bool> {
        self.update_status(id, status, None).await
    }

    /// Like `set_status`, but only while the note is still at `modified_at`.
    /// A newer local edit keeps its own status.
    pub async fn settle(
        &self,
        id: &NoteId,
        modified_at: DateTime<Utc>,
        status: SyncStatus,
    ) -> SyncResult<bool> {
        self.update_status(id, status, Some(modified_at)).await
    }

    async fn update_status(
        &self,
        id: &NoteId,
        status: SyncStatus,
        at: Option<DateTime<Utc>>,
    ) -> SyncResult<bool> {
        let mut notes = self.notes.lock().await;
        match notes.get(id) {
            None => return Ok(false),
            Some(note) if at.is_some_and(|t| note.modified_at != t) => return Ok(false),
            Some(note) if note.sync_status == status => return Ok(true),
            Some(_) => {}
        }

        let mut next = notes.clone();
        if let Some(note) = next.get_mut(id) {
            note.sync_status = status;
        }
        self.persist(&next).await?;
        *notes = next;
        drop(notes);

        self.notify(NoteChange::StatusChanged(id.clone(), status));
        Ok(true)
    }

    /// Remove a note. Returns the removed note, if any.
    pub async fn delete(&self, id: &NoteId) -> SyncResult<Option<Note>> {
        let mut notes = self.notes.lock().await;
        if !notes.contains_key(id) {
            return Ok(None);
        }

        let mut next = notes.clone();
        let removed = next.remove(id);
        self.persist(&next).await?;
        *notes = next;
        drop(notes);

        self.notify(NoteChange::Deleted(id.clone()));
        Ok(removed)
    }

    async fn persist(&self, notes: &HashMap<NoteId, Note>) -> SyncResult<()> {
        let file = NoteFile {
            notes: sorted(notes.values().cloned().collect()),
        };
        write_json(&self.path, &file).await
    }

    fn notify(&self, change: NoteChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

fn sorted(mut notes: Vec<Note>) -> Vec<Note> {
    notes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    notes
}
