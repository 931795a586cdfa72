//! CommitQueue - durable, coalescing FIFO of pending remote writes.
//!
//! Protocol is commit-then-ack: `dequeue_all` hands out a snapshot without
//! removing anything, and an intent only leaves the queue through `ack`.
//! Every mutation is flushed to disk before the call returns, so a crash
//! between enqueue and drain never loses a commit.

use crate::error::SyncResult;
use crate::models::{Note, NoteId};
use crate::storage::fs::{read_json_or_default, write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    Upsert,
    Delete,
}

/// A queued request to replicate one note's state remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitIntent {
    /// Assigned on enqueue; strictly increasing across the queue's lifetime.
    #[serde(default)]
    pub seq: u64,
    pub note_id: NoteId,
    pub operation: CommitOperation,
    /// Snapshot at enqueue time. `None` for deletes.
    pub payload: Option<Note>,
    pub enqueued_at: DateTime<Utc>,
}

impl CommitIntent {
    pub fn upsert(note: Note) -> Self {
        Self {
            seq: 0,
            note_id: note.id.clone(),
            operation: CommitOperation::Upsert,
            payload: Some(note),
            enqueued_at: Utc::now(),
        }
    }

    pub fn delete(note_id: NoteId) -> Self {
        Self {
            seq: 0,
            note_id,
            operation: CommitOperation::Delete,
            payload: None,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    intents: Vec<CommitIntent>,
}

pub struct CommitQueue {
    path: PathBuf,
    state: Mutex<QueueFile>,
    count: watch::Sender<usize>,
}

impl CommitQueue {
    /// Open the queue at `path`. A missing or corrupt file yields an empty queue.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut file: QueueFile = read_json_or_default(&path).await;

        // Guard against a hand-edited file with a stale counter.
        let max_seq = file.intents.iter().map(|i| i.seq).max().unwrap_or(0);
        file.next_seq = file.next_seq.max(max_seq + 1);

        debug!(
            "[CommitQueue] Loaded {} pending intents from {:?}",
            file.intents.len(),
            path
        );
        let (count, _) = watch::channel(file.intents.len());
        Self {
            path,
            state: Mutex::new(file),
            count,
        }
    }

    /// Append an intent, or replace the queued one for the same note in place.
    /// Returns the intent as stored (with its sequence number).
    pub async fn enqueue(&self, mut intent: CommitIntent) -> SyncResult<CommitIntent> {
        let mut state = self.state.lock().await;
        intent.seq = state.next_seq;

        let mut intents = state.intents.clone();
        match intents.iter_mut().find(|i| i.note_id == intent.note_id) {
            Some(existing) => *existing = intent.clone(),
            None => intents.push(intent.clone()),
        }

        self.commit(&mut state, intents, intent.seq + 1).await?;
        Ok(intent)
    }

    /// Snapshot of every pending intent in FIFO order. Nothing is removed;
    /// callers `ack` what they replicated.
    pub async fn dequeue_all(&self) -> Vec<CommitIntent> {
        self.state.lock().await.intents.clone()
    }

    pub async fn pending_for(&self, note_id: &NoteId) -> Option<CommitIntent> {
        self.state
            .lock()
            .await
            .intents
            .iter()
            .find(|i| &i.note_id == note_id)
            .cloned()
    }

    pub async fn contains(&self, note_id: &NoteId) -> bool {
        self.pending_for(note_id).await.is_some()
    }

    /// Remove `intent` after it was replicated. A newer intent that coalesced
    /// over it in the meantime stays queued; returns whether anything was removed.
    pub async fn ack(&self, intent: &CommitIntent) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.intents.iter().position(|i| i.seq == intent.seq) else {
            return Ok(false);
        };

        let mut intents = state.intents.clone();
        intents.remove(pos);
        let next_seq = state.next_seq;
        self.commit(&mut state, intents, next_seq).await?;
        Ok(true)
    }

    /// Put a failed intent back at the head of the queue. If a newer intent for
    /// the same note is queued, that one moves to the head instead.
    pub async fn requeue(&self, intent: CommitIntent) -> SyncResult<()> {
        let mut state = self.state.lock().await;

        let mut intents = state.intents.clone();
        let head = match intents.iter().position(|i| i.note_id == intent.note_id) {
            Some(pos) => intents.remove(pos),
            None => intent,
        };
        intents.insert(0, head);

        let next_seq = state.next_seq;
        self.commit(&mut state, intents, next_seq).await
    }

    /// Drop every intent for a note regardless of sequence.
    pub async fn remove_note(&self, note_id: &NoteId) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        if !state.intents.iter().any(|i| &i.note_id == note_id) {
            return Ok(false);
        }

        let intents = state
            .intents
            .iter()
            .filter(|i| &i.note_id != note_id)
            .cloned()
            .collect();
        let next_seq = state.next_seq;
        self.commit(&mut state, intents, next_seq).await?;
        Ok(true)
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.intents.len()
    }

    /// Pending-count updates for status indicators.
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Persist first, then publish in memory.
    async fn commit(
        &self,
        state: &mut QueueFile,
        intents: Vec<CommitIntent>,
        next_seq: u64,
    ) -> SyncResult<()> {
        let file = QueueFile { next_seq, intents };
        write_json(&self.path, &file).await?;
        *state = file;
        self.count.send_replace(state.intents.len());
        Ok(())
    }
}
