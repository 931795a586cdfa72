//! SyncCoordinator - push/pull orchestration over the local stores.
//!
//! A cycle is Idle -> Pushing -> Pulling -> Idle. At most one cycle runs at a
//! time; a `sync()` that arrives mid-cycle only raises the rerun flag, and the
//! running cycle goes around once more before releasing the lock.
//!
//! Per-note failures end up in the note's sync status and never abort the
//! other notes. Whole-operation failures (no credential, no network, listing
//! failed) are returned from the manual `push()`/`pull()` entry points and
//! swallowed by `sync()`.

use crate::error::{SyncError, SyncResult};
use crate::models::{Note, NoteId, SyncStatus};
use crate::storage::fs::sha256_hex;
use crate::storage::{CommitIntent, CommitOperation, CommitQueue, MergeBase, NoteStore};
use crate::sync::background::BackgroundExecutor;
use crate::sync::codec::{decode_note, encode_note};
use crate::sync::credentials::{require_token, CredentialStore};
use crate::sync::ledger::{LedgerEntry, SyncLedger};
use crate::sync::network::NetworkMonitor;
use crate::sync::remote::{RemoteEntry, RemoteLayout, RemoteStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Where the coordinator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
}

/// How a user settles a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the remote with the local note.
    KeepLocal,
    /// Replace the local note with the remote version.
    KeepRemote,
}

/// Coarse readiness signals for a status dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationStatus {
    pub auth_configured: bool,
    pub repo_configured: bool,
    pub network_reachable: bool,
}

/// Counters from one or more passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub deleted: usize,
    /// Intents acknowledged without a remote write
    pub unchanged: usize,
    /// Intents held back by an unresolved conflict
    pub held: usize,
    pub pulled: usize,
    /// Local notes removed because the remote file disappeared
    pub removed: usize,
    pub conflicts: usize,
    pub errors: usize,
    /// The cycle did not run (offline, signed out, or another cycle in flight)
    pub deferred: bool,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.held += other.held;
        self.pulled += other.pulled;
        self.removed += other.removed;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts == 0 && self.errors == 0 && !self.deferred
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pushed {}, deleted {}, pulled {}, removed {}, conflicts {}, errors {}",
            self.pushed, self.deleted, self.pulled, self.removed, self.conflicts, self.errors
        )
    }
}

enum PushOutcome {
    Pushed,
    Deleted,
    Unchanged,
    Held,
    Conflict,
}

enum PullOutcome {
    Inserted,
    Updated,
    /// Local edit pending; only bookkeeping changed
    Deferred,
    /// Local copy is newer; re-enqueued for push
    Requeued,
}

/// The leaf components the coordinator is wired to.
pub struct SyncComponents {
    pub notes: Arc<NoteStore>,
    pub queue: Arc<CommitQueue>,
    pub remote: Arc<dyn RemoteStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub network: NetworkMonitor,
}

pub struct SyncCoordinator {
    pub(crate) notes: Arc<NoteStore>,
    pub(crate) queue: Arc<CommitQueue>,
    pub(crate) remote: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialStore>,
    network: NetworkMonitor,
    pub(crate) layout: RemoteLayout,
    repo_configured: bool,
    pub(crate) ledger: Mutex<SyncLedger>,
    /// Held for the whole of a cycle (or manual push/pull).
    pub(crate) cycle: Mutex<()>,
    rerun: AtomicBool,
    phase: watch::Sender<SyncPhase>,
    background: BackgroundExecutor,
}

impl SyncCoordinator {
    pub fn new(
        components: SyncComponents,
        ledger: SyncLedger,
        layout: RemoteLayout,
        repo_configured: bool,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Arc::new(Self {
            notes: components.notes,
            queue: components.queue,
            remote: components.remote,
            credentials: components.credentials,
            network: components.network,
            layout,
            repo_configured,
            ledger: Mutex::new(ledger),
            cycle: Mutex::new(()),
            rerun: AtomicBool::new(false),
            phase,
            background: BackgroundExecutor::new(),
        })
    }

    pub fn notes(&self) -> &Arc<NoteStore> {
        &self.notes
    }

    pub fn queue(&self) -> &Arc<CommitQueue> {
        &self.queue
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn background(&self) -> &BackgroundExecutor {
        &self.background
    }

    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.count().await
    }

    pub async fn configuration_status(&self) -> ConfigurationStatus {
        ConfigurationStatus {
            auth_configured: self.credentials.is_configured().await,
            repo_configured: self.repo_configured,
            network_reachable: self.network.is_reachable(),
        }
    }

    /// Notes held in conflict, paired with the remote version that conflicted.
    pub async fn conflicts(&self) -> Vec<(Note, Option<Note>)> {
        let ids: Vec<(NoteId, Option<Note>)> = {
            let ledger = self.ledger.lock().await;
            self.notes
                .fetch_all()
                .await
                .into_iter()
                .filter(|n| n.sync_status == SyncStatus::Conflict)
                .map(|n| {
                    let remote = ledger.get(&n.id).and_then(|e| e.conflict.clone());
                    (n.id, remote)
                })
                .collect()
        };

        let mut out = Vec::with_capacity(ids.len());
        for (id, remote) in ids {
            if let Some(local) = self.notes.fetch(&id).await {
                out.push((local, remote));
            }
        }
        out
    }

    // ============ EDIT FLOW ============

    /// Local edit: durable write, then a detached push of that note.
    /// Succeeds whenever the local write does, regardless of the remote.
    pub async fn save_note(self: &Arc<Self>, note: Note) -> SyncResult<Note> {
        let saved = self.notes.save(note).await?;
        self.commit_background(saved.clone()).await;
        Ok(saved)
    }

    /// Local delete: removed immediately, remote delete queued independently.
    pub async fn delete_note(self: &Arc<Self>, id: &NoteId) -> SyncResult<bool> {
        if self.notes.delete(id).await?.is_none() {
            return Ok(false);
        }

        match self.queue.enqueue(CommitIntent::delete(id.clone())).await {
            Ok(_) => self.schedule_push(id.clone()),
            Err(e) => warn!("[Sync] Cannot queue delete of {}: {}", id, e),
        }
        Ok(true)
    }

    /// Fire-and-forget: enqueue the note, then push it on a background task.
    /// Errors never reach the caller; only the note's sync status reflects them.
    pub async fn commit_background(self: &Arc<Self>, note: Note) {
        let id = note.id.clone();
        if let Err(e) = self.queue.enqueue(CommitIntent::upsert(note)).await {
            // The note stays pending; the next push pass re-enqueues it.
            warn!("[Sync] Cannot queue commit of {}: {}", id, e);
            return;
        }
        self.schedule_push(id);
    }

    fn schedule_push(self: &Arc<Self>, id: NoteId) {
        let this = Arc::clone(self);
        self.background.submit("push-note", async move {
            this.push_one(&id).await;
        });
    }

    async fn push_one(&self, id: &NoteId) {
        let Ok(guard) = self.cycle.try_lock() else {
            self.rerun.store(true, Ordering::SeqCst);
            debug!("[Sync] Cycle in flight, {} rides the rerun", id);
            return;
        };

        if let Err(e) = self.ensure_ready().await {
            debug!("[Sync] Background push of {} deferred: {}", id, e);
        } else if let Err(e) = self.push_pass(Some(id)).await {
            debug!("[Sync] Background push of {} failed: {}", id, e);
        }
        self.set_phase(SyncPhase::Idle);
        self.release_cycle(guard).await;
    }

    // ============ CYCLES ============

    /// Push then pull. Never fails; outcomes land in per-note status.
    pub async fn sync(&self) -> SyncReport {
        let mut total = SyncReport::default();
        let mut ran = false;

        loop {
            let Ok(guard) = self.cycle.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("[Sync] Cycle in flight, rerun requested");
                total.deferred |= !ran;
                return total;
            };

            loop {
                self.rerun.store(false, Ordering::SeqCst);
                let report = self.run_cycle().await;
                total.deferred = report.deferred;
                total.absorb(report);
                ran = true;
                if !self.rerun.load(Ordering::SeqCst) {
                    break;
                }
                debug!("[Sync] Rerun requested during cycle, going again");
            }
            drop(guard);

            // A request can land between the last check and the unlock.
            if !self.rerun.load(Ordering::SeqCst) {
                return total;
            }
        }
    }

    /// Manual push. Fails on whole-operation errors such as a missing credential.
    pub async fn push(&self) -> SyncResult<SyncReport> {
        let guard = self.cycle.lock().await;
        let result = match self.ensure_ready().await {
            Ok(()) => self.push_pass(None).await,
            Err(e) => Err(e),
        };
        self.set_phase(SyncPhase::Idle);
        self.release_cycle(guard).await;
        result
    }

    /// Manual pull. Fails on whole-operation errors such as a missing credential.
    pub async fn pull(&self) -> SyncResult<SyncReport> {
        let guard = self.cycle.lock().await;
        let result = match self.ensure_ready().await {
            Ok(()) => self.pull_pass().await,
            Err(e) => Err(e),
        };
        self.set_phase(SyncPhase::Idle);
        self.release_cycle(guard).await;
        result
    }

    /// Every holder of the cycle lock other than `sync()` itself releases it
    /// here, so a `sync()` or background push turned away meanwhile still runs.
    pub(crate) async fn release_cycle(&self, guard: MutexGuard<'_, ()>) {
        drop(guard);
        if self.rerun.load(Ordering::SeqCst) {
            debug!("[Sync] Running the cycle requested while the lock was held");
            self.sync().await;
        }
    }

    async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        if let Err(e) = self.ensure_ready().await {
            debug!("[Sync] Cycle deferred: {}", e);
            report.deferred = true;
            return report;
        }

        match self.push_pass(None).await {
            Ok(pushed) => report.absorb(pushed),
            Err(e) if e.aborts_operation() => {
                warn!("[Sync] Push aborted: {}", e);
                self.set_phase(SyncPhase::Idle);
                report.deferred = true;
                return report;
            }
            Err(e) => warn!("[Sync] Push pass failed: {}", e),
        }

        match self.pull_pass().await {
            Ok(pulled) => report.absorb(pulled),
            Err(e) => warn!("[Sync] Pull pass failed: {}", e),
        }

        self.set_phase(SyncPhase::Idle);
        info!("[Sync] Cycle against {} complete: {}", self.remote.name(), report);
        report
    }

    pub(crate) async fn ensure_ready(&self) -> SyncResult<()> {
        if !self.repo_configured {
            return Err(SyncError::Authentication(
                "No remote repository configured".into(),
            ));
        }
        require_token(self.credentials.as_ref()).await?;
        if !self.network.is_reachable() {
            return Err(SyncError::NetworkUnavailable);
        }
        Ok(())
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
    }

    // ============ PUSH ============

    /// Drain the queue (or just `only`'s intent). A transient failure
    /// re-enqueues the intent and ends the pass.
    async fn push_pass(&self, only: Option<&NoteId>) -> SyncResult<SyncReport> {
        self.set_phase(SyncPhase::Pushing);
        let mut report = SyncReport::default();

        if only.is_none() {
            self.recover_orphans().await?;
        }

        let intents: Vec<CommitIntent> = self
            .queue
            .dequeue_all()
            .await
            .into_iter()
            .filter(|i| only.map_or(true, |id| &i.note_id == id))
            .collect();

        for intent in intents {
            match self.push_intent(&intent).await {
                Ok(PushOutcome::Pushed) => report.pushed += 1,
                Ok(PushOutcome::Deleted) => report.deleted += 1,
                Ok(PushOutcome::Unchanged) => report.unchanged += 1,
                Ok(PushOutcome::Held) => report.held += 1,
                Ok(PushOutcome::Conflict) => report.conflicts += 1,
                Err(e) if e.aborts_operation() => return Err(e),
                Err(e) if e.is_transient() => {
                    warn!(
                        "[Sync] Push of {} failed, aborting pass: {}",
                        intent.note_id, e
                    );
                    report.errors += 1;
                    self.queue.requeue(intent.clone()).await?;
                    self.notes.set_status(&intent.note_id, SyncStatus::Error).await?;
                    break;
                }
                Err(e) => {
                    // Not retryable as-is; the intent stays queued for a later edit.
                    warn!("[Sync] Push of {} failed: {}", intent.note_id, e);
                    report.errors += 1;
                    self.notes.set_status(&intent.note_id, SyncStatus::Error).await?;
                }
            }
        }

        debug!("[Sync] Push pass: {}", report);
        Ok(report)
    }

    /// Re-enqueue notes left pending without an intent (crash between the
    /// note write and the enqueue, or a failed background enqueue).
    async fn recover_orphans(&self) -> SyncResult<()> {
        for note in self.notes.fetch_all().await {
            let unsent = matches!(note.sync_status, SyncStatus::Pending | SyncStatus::Error);
            if unsent && !self.queue.contains(&note.id).await {
                info!("[Sync] Re-queueing orphaned note {}", note.id);
                self.queue.enqueue(CommitIntent::upsert(note)).await?;
            }
        }
        Ok(())
    }

    async fn push_intent(&self, intent: &CommitIntent) -> SyncResult<PushOutcome> {
        let id = &intent.note_id;
        let entry = self.ledger_entry(id).await;

        if entry.held_seq.is_some_and(|held| intent.seq <= held) {
            return Ok(PushOutcome::Held);
        }

        let path = self.layout.note_path(id);
        match intent.operation {
            CommitOperation::Upsert => {
                let Some(note) = intent.payload.as_ref() else {
                    warn!("[Sync] Dropping upsert of {} without payload", id);
                    self.queue.ack(intent).await?;
                    return Ok(PushOutcome::Unchanged);
                };

                let content = encode_note(note)?;
                let digest = sha256_hex(&content);

                if entry.token.is_some() && entry.digest.as_deref() == Some(digest.as_str()) {
                    debug!("[Sync] {} unchanged since last push", id);
                    self.finish_upsert(intent, note).await?;
                    return Ok(PushOutcome::Unchanged);
                }

                match self
                    .remote
                    .write_file(&path, &content, entry.token.as_deref())
                    .await
                {
                    Ok(token) => {
                        self.ledger
                            .lock()
                            .await
                            .update(id.as_str(), |e| {
                                e.token = Some(token);
                                e.digest = Some(digest);
                                e.observed = None;
                                e.held_seq = None;
                                e.conflict = None;
                            })
                            .await?;
                        self.finish_upsert(intent, note).await?;
                        debug!("[Sync] Pushed {}", path);
                        Ok(PushOutcome::Pushed)
                    }
                    Err(SyncError::Conflict { .. }) => {
                        self.record_conflict(intent, &path, &entry).await?;
                        Ok(PushOutcome::Conflict)
                    }
                    Err(e) => Err(e),
                }
            }
            CommitOperation::Delete => {
                let Some(token) = entry.token.clone() else {
                    // Never reached the remote.
                    self.ledger.lock().await.remove(id.as_str()).await?;
                    self.queue.ack(intent).await?;
                    return Ok(PushOutcome::Unchanged);
                };

                match self.remote.delete_file(&path, &token).await {
                    Ok(()) | Err(SyncError::NotFound(_)) => {
                        self.ledger.lock().await.remove(id.as_str()).await?;
                        self.queue.ack(intent).await?;
                        Ok(PushOutcome::Deleted)
                    }
                    Err(SyncError::Conflict { .. }) => {
                        // Edited remotely after our last sync: the edit wins and
                        // the next pull brings the note back.
                        warn!("[Sync] {} changed remotely, local delete dropped", path);
                        self.ledger.lock().await.remove(id.as_str()).await?;
                        self.queue.ack(intent).await?;
                        Ok(PushOutcome::Conflict)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Ack the intent; mark synced unless a newer edit landed meanwhile.
    async fn finish_upsert(&self, intent: &CommitIntent, note: &Note) -> SyncResult<()> {
        if self.queue.ack(intent).await? {
            self.notes
                .settle(&intent.note_id, note.modified_at, SyncStatus::Synced)
                .await?;
        }
        Ok(())
    }

    /// Keep the intent, fetch the conflicting version and hold the note until
    /// a fresh edit or an explicit resolution.
    async fn record_conflict(
        &self,
        intent: &CommitIntent,
        path: &str,
        entry: &LedgerEntry,
    ) -> SyncResult<()> {
        let id = &intent.note_id;
        warn!("[Sync] Conflict on {}", path);

        let (token, snapshot) = match self.remote.read_file(path).await {
            Ok(file) => match decode_note(&file.content) {
                Ok(remote) => (Some(file.token), Some(remote)),
                Err(e) => {
                    warn!("[Sync] Conflicting version of {} unreadable: {}", path, e);
                    (Some(file.token), None)
                }
            },
            // Deleted remotely; a fresh edit recreates it.
            Err(SyncError::NotFound(_)) => (None, None),
            Err(e) => {
                warn!("[Sync] Cannot fetch conflicting {}: {}", path, e);
                (entry.token.clone(), None)
            }
        };

        self.ledger
            .lock()
            .await
            .update(id.as_str(), |e| {
                e.observed = token.clone();
                e.token = token;
                e.held_seq = Some(intent.seq);
                e.conflict = snapshot;
            })
            .await?;
        self.notes.set_status(id, SyncStatus::Conflict).await?;
        Ok(())
    }

    // ============ PULL ============

    async fn pull_pass(&self) -> SyncResult<SyncReport> {
        self.set_phase(SyncPhase::Pulling);
        let mut report = SyncReport::default();

        let listing = self.remote.list_files(&self.layout.notes_dir).await?;
        let mut listed = HashSet::new();

        for entry in listing {
            let Some(id) = self.layout.note_id_for(&entry.path) else {
                continue;
            };
            listed.insert(id.clone());

            let known = self.ledger_entry(&id).await;
            if known.knows(&entry.token) {
                continue;
            }

            match self.pull_file(&id, &entry).await {
                Ok(PullOutcome::Inserted | PullOutcome::Updated) => report.pulled += 1,
                Ok(PullOutcome::Deferred) => {}
                Ok(PullOutcome::Requeued) => {}
                Err(e) if e.aborts_operation() => return Err(e),
                Err(e) => {
                    warn!("[Sync] Pull of {} failed: {}", entry.path, e);
                    report.errors += 1;
                }
            }
        }

        let tracked = self.ledger.lock().await.tracked_notes();
        for id in tracked.into_iter().filter(|id| !listed.contains(id)) {
            if self.apply_remote_delete(&id).await? {
                report.removed += 1;
            }
        }

        debug!("[Sync] Pull pass: {}", report);
        Ok(report)
    }

    async fn pull_file(&self, id: &NoteId, entry: &RemoteEntry) -> SyncResult<PullOutcome> {
        let file = self.remote.read_file(&entry.path).await?;

        let remote = match decode_note(&file.content) {
            Ok(note) if &note.id == id => note,
            Ok(note) => {
                self.observe(id, &file.token).await?;
                return Err(SyncError::decoding(format!(
                    "{} declares id {}",
                    entry.path, note.id
                )));
            }
            Err(e) => {
                self.observe(id, &file.token).await?;
                return Err(e);
            }
        };
        let digest = sha256_hex(&file.content);

        let local = self.notes.fetch(id).await;
        let pending = self.queue.contains(id).await;
        let base = match &local {
            None => MergeBase::Missing,
            Some(note) => MergeBase::Clean(note.modified_at),
        };

        match local {
            // Deleted locally with the delete still queued.
            None if pending => {
                self.observe(id, &file.token).await?;
                Ok(PullOutcome::Deferred)
            }
            None => {
                if !self.adopt_remote(remote, file.token.clone(), digest, base).await? {
                    return self.defer_to_local_edit(id, &file.token).await;
                }
                Ok(PullOutcome::Inserted)
            }
            Some(local) if pending || local.sync_status.has_local_edit() => {
                let in_conflict = local.sync_status == SyncStatus::Conflict;
                self.ledger
                    .lock()
                    .await
                    .update(id.as_str(), |e| {
                        e.observed = Some(file.token.clone());
                        if in_conflict {
                            e.token = Some(file.token);
                            e.conflict = Some(remote);
                        }
                    })
                    .await?;
                Ok(PullOutcome::Deferred)
            }
            Some(local) if remote.modified_at >= local.modified_at => {
                if !self.adopt_remote(remote, file.token.clone(), digest, base).await? {
                    return self.defer_to_local_edit(id, &file.token).await;
                }
                Ok(PullOutcome::Updated)
            }
            Some(local) => {
                debug!("[Sync] Local {} is newer than remote, re-queueing", id);
                self.ledger
                    .lock()
                    .await
                    .update(id.as_str(), |e| {
                        e.token = Some(file.token);
                        e.observed = None;
                    })
                    .await?;
                self.queue.enqueue(CommitIntent::upsert(local)).await?;
                self.notes.set_status(id, SyncStatus::Pending).await?;
                Ok(PullOutcome::Requeued)
            }
        }
    }

    /// Merge a remote note in as synced and remember its token. Returns false
    /// when the local copy no longer matches `base`.
    async fn adopt_remote(
        &self,
        mut remote: Note,
        token: String,
        digest: String,
        base: MergeBase,
    ) -> SyncResult<bool> {
        let id = remote.id.clone();
        remote.sync_status = SyncStatus::Synced;
        if !self.notes.merge(remote, base).await? {
            return Ok(false);
        }
        self.ledger
            .lock()
            .await
            .update(id.as_str(), |e| {
                e.token = Some(token);
                e.digest = Some(digest);
                e.observed = None;
                e.held_seq = None;
                e.conflict = None;
            })
            .await?;
        Ok(true)
    }

    /// A local edit landed while the remote copy was being fetched. Treat it
    /// like any pending edit: remember the token seen, keep local content.
    async fn defer_to_local_edit(&self, id: &NoteId, token: &str) -> SyncResult<PullOutcome> {
        debug!("[Sync] {} edited locally during pull, keeping local copy", id);
        self.observe(id, token).await?;
        Ok(PullOutcome::Deferred)
    }

    /// Remote file vanished. Returns true when the local note was removed.
    async fn apply_remote_delete(&self, id: &NoteId) -> SyncResult<bool> {
        if self.queue.contains(id).await {
            // Local edit wins; recreate on next push.
            self.ledger
                .lock()
                .await
                .update(id.as_str(), |e| {
                    e.token = None;
                    e.digest = None;
                    e.observed = None;
                })
                .await?;
            return Ok(false);
        }

        info!("[Sync] {} deleted remotely", id);
        self.ledger.lock().await.remove(id.as_str()).await?;
        Ok(self.notes.delete(id).await?.is_some())
    }

    async fn observe(&self, id: &NoteId, token: &str) -> SyncResult<()> {
        let token = token.to_string();
        self.ledger
            .lock()
            .await
            .update(id.as_str(), |e| e.observed = Some(token))
            .await
    }

    async fn ledger_entry(&self, id: &NoteId) -> LedgerEntry {
        self.ledger
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    // ============ CONFLICTS ============

    /// Settle a conflict explicitly.
    pub async fn resolve_conflict(&self, id: &NoteId, resolution: Resolution) -> SyncResult<()> {
        let guard = self.cycle.lock().await;
        let result = self.resolve_locked(id, resolution).await;
        self.release_cycle(guard).await;
        result
    }

    async fn resolve_locked(&self, id: &NoteId, resolution: Resolution) -> SyncResult<()> {
        let local = self
            .notes
            .fetch(id)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("note {}", id)))?;
        if local.sync_status != SyncStatus::Conflict {
            return Err(SyncError::Storage(format!("Note {} is not in conflict", id)));
        }
        let entry = self.ledger_entry(id).await;

        match resolution {
            Resolution::KeepLocal => {
                self.ledger
                    .lock()
                    .await
                    .update(id.as_str(), |e| {
                        e.held_seq = None;
                        e.conflict = None;
                    })
                    .await?;
                self.queue.enqueue(CommitIntent::upsert(local)).await?;
                self.notes.set_status(id, SyncStatus::Pending).await?;
                info!("[Sync] Conflict on {} resolved: keep local", id);
            }
            Resolution::KeepRemote => match entry.conflict {
                Some(remote) => {
                    let digest = sha256_hex(&encode_note(&remote)?);
                    let token = entry.token.clone().unwrap_or_default();
                    self.queue.remove_note(id).await?;
                    let base = MergeBase::Exact(local.modified_at);
                    if !self.adopt_remote(remote, token, digest, base).await? {
                        return Err(SyncError::Storage(format!(
                            "Note {} was edited while resolving, keeping the edit",
                            id
                        )));
                    }
                    info!("[Sync] Conflict on {} resolved: keep remote", id);
                }
                None if entry.token.is_none() => {
                    self.queue.remove_note(id).await?;
                    self.ledger.lock().await.remove(id.as_str()).await?;
                    self.notes.delete(id).await?;
                    info!("[Sync] Conflict on {} resolved: accepted remote delete", id);
                }
                None => {
                    return Err(SyncError::api(
                        "Remote version not fetched yet, run sync first",
                    ));
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::credentials::MemoryCredentialStore;
    use crate::sync::memory::{MemoryRemote, SimulatedFailure};
    use crate::sync::remote::RemoteFile;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Memory remote whose writes take a while, to hold a cycle open.
    struct SlowRemote {
        inner: Arc<MemoryRemote>,
        delay: Duration,
    }

    #[async_trait]
    impl RemoteStore for SlowRemote {
        fn name(&self) -> &'static str {
            "slow-memory"
        }

        async fn list_files(&self, dir: &str) -> SyncResult<Vec<RemoteEntry>> {
            self.inner.list_files(dir).await
        }

        async fn read_file(&self, path: &str) -> SyncResult<RemoteFile> {
            self.inner.read_file(path).await
        }

        async fn write_file(
            &self,
            path: &str,
            content: &[u8],
            expected_token: Option<&str>,
        ) -> SyncResult<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.write_file(path, content, expected_token).await
        }

        async fn delete_file(&self, path: &str, expected_token: &str) -> SyncResult<()> {
            self.inner.delete_file(path, expected_token).await
        }

        async fn initialize_empty_repository(&self) -> SyncResult<()> {
            self.inner.initialize_empty_repository().await
        }
    }

    struct Fixture {
        _temp: TempDir,
        remote: Arc<MemoryRemote>,
        network: NetworkMonitor,
        coordinator: Arc<SyncCoordinator>,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let network = NetworkMonitor::new(true);
        let components = SyncComponents {
            notes: Arc::new(NoteStore::open(temp.path().join("notes.json")).await),
            queue: Arc::new(CommitQueue::open(temp.path().join("queue.json")).await),
            remote: remote.clone(),
            credentials: Arc::new(MemoryCredentialStore::with_token("t")),
            network: network.clone(),
        };
        let ledger = SyncLedger::open(temp.path().join("sync_state.json")).await;
        let coordinator =
            SyncCoordinator::new(components, ledger, RemoteLayout::default(), true);
        Fixture {
            _temp: temp,
            remote,
            network,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_second_push_of_unchanged_note_writes_nothing() {
        let f = fixture().await;
        f.network.set_reachable(false);
        let note = f.coordinator.save_note(Note::new("a", "b")).await.unwrap();
        f.coordinator.background().wait_idle().await;
        f.network.set_reachable(true);

        f.coordinator.push().await.unwrap();
        assert_eq!(f.remote.write_count(), 1);

        let stored = f.coordinator.notes().fetch(&note.id).await.unwrap();
        f.coordinator.commit_background(stored).await;
        f.coordinator.background().wait_idle().await;
        f.coordinator.push().await.unwrap();

        assert_eq!(f.remote.write_count(), 1);
        assert_eq!(f.coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_and_marks_error() {
        let f = fixture().await;
        f.network.set_reachable(false);
        let a = f.coordinator.save_note(Note::new("a", "")).await.unwrap();
        let b = f.coordinator.save_note(Note::new("b", "")).await.unwrap();
        f.coordinator.background().wait_idle().await;
        f.network.set_reachable(true);

        f.remote.set_failure(Some(SimulatedFailure::Api));
        let report = f.coordinator.push().await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.pushed, 0);
        assert_eq!(f.coordinator.pending_count().await, 2);

        let statuses = (
            f.coordinator.notes().fetch(&a.id).await.unwrap().sync_status,
            f.coordinator.notes().fetch(&b.id).await.unwrap().sync_status,
        );
        assert_eq!(statuses, (SyncStatus::Error, SyncStatus::Pending));

        f.remote.set_failure(None);
        let report = f.coordinator.sync().await;
        assert_eq!(report.pushed, 2);
        assert_eq!(f.coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_manual_push_without_credential_fails() {
        let temp = TempDir::new().unwrap();
        let components = SyncComponents {
            notes: Arc::new(NoteStore::open(temp.path().join("n.json")).await),
            queue: Arc::new(CommitQueue::open(temp.path().join("q.json")).await),
            remote: Arc::new(MemoryRemote::new()),
            credentials: Arc::new(MemoryCredentialStore::new()),
            network: NetworkMonitor::new(true),
        };
        let ledger = SyncLedger::open(temp.path().join("s.json")).await;
        let coordinator = SyncCoordinator::new(components, ledger, RemoteLayout::default(), true);

        assert!(matches!(
            coordinator.push().await,
            Err(SyncError::Authentication(_))
        ));
        assert!(matches!(
            coordinator.pull().await,
            Err(SyncError::Authentication(_))
        ));
        let report = coordinator.sync().await;
        assert!(report.deferred);
    }

    #[tokio::test]
    async fn test_offline_manual_pull_reports_network() {
        let f = fixture().await;
        f.network.set_reachable(false);
        assert!(matches!(
            f.coordinator.pull().await,
            Err(SyncError::NetworkUnavailable)
        ));
        assert_eq!(*f.coordinator.phase().borrow(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_sync_mid_cycle_sets_rerun_instead_of_running() {
        let f = fixture().await;
        let guard = f.coordinator.cycle.lock().await;
        let report = f.coordinator.sync().await;
        assert!(report.deferred);
        assert!(f.coordinator.rerun.load(Ordering::SeqCst));
        drop(guard);
    }

    #[tokio::test]
    async fn test_sync_requested_during_manual_push_runs_after_it() {
        let temp = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRemote::new());
        let network = NetworkMonitor::new(false);
        let components = SyncComponents {
            notes: Arc::new(NoteStore::open(temp.path().join("n.json")).await),
            queue: Arc::new(CommitQueue::open(temp.path().join("q.json")).await),
            remote: Arc::new(SlowRemote {
                inner: memory.clone(),
                delay: Duration::from_millis(300),
            }),
            credentials: Arc::new(MemoryCredentialStore::with_token("t")),
            network: network.clone(),
        };
        let ledger = SyncLedger::open(temp.path().join("s.json")).await;
        let coordinator = SyncCoordinator::new(components, ledger, RemoteLayout::default(), true);

        coordinator.save_note(Note::new("a", "")).await.unwrap();
        coordinator.background().wait_idle().await;
        network.set_reachable(true);

        let mut phase = coordinator.phase();
        let manual = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.push().await })
        };
        phase
            .wait_for(|p| *p == SyncPhase::Pushing)
            .await
            .unwrap();

        // Lands while the manual push is writing note a.
        let b = coordinator.save_note(Note::new("b", "")).await.unwrap();
        assert!(coordinator.sync().await.deferred);

        manual.await.unwrap().unwrap();
        coordinator.background().wait_idle().await;

        let b = coordinator.notes().fetch(&b.id).await.unwrap();
        assert_eq!(b.sync_status, SyncStatus::Synced);
        assert_eq!(coordinator.pending_count().await, 0);
        assert_eq!(memory.file_count(), 2);
        assert!(!coordinator.rerun.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_request_during_resolution_is_not_lost() {
        let f = fixture().await;
        let note = f.coordinator.save_note(Note::new("n", "")).await.unwrap();
        f.coordinator.background().wait_idle().await;

        // Lock held as resolve_conflict would; a sync arrives meanwhile.
        let guard = f.coordinator.cycle.lock().await;
        let queued = f.coordinator.save_note(note).await.unwrap();
        assert!(f.coordinator.sync().await.deferred);
        f.coordinator.release_cycle(guard).await;
        f.coordinator.background().wait_idle().await;

        let stored = f.coordinator.notes().fetch(&queued.id).await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(!f.coordinator.rerun.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_local_delete_removes_remote_file() {
        let f = fixture().await;
        let note = f.coordinator.save_note(Note::new("gone", "")).await.unwrap();
        f.coordinator.background().wait_idle().await;
        let path = RemoteLayout::default().note_path(&note.id);
        assert!(f.remote.get(&path).is_some());

        assert!(f.coordinator.delete_note(&note.id).await.unwrap());
        f.coordinator.background().wait_idle().await;
        f.coordinator.sync().await;

        assert!(f.remote.get(&path).is_none());
        assert!(f.coordinator.notes().fetch(&note.id).await.is_none());
        assert_eq!(f.coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_of_remotely_edited_note_reimports_it() {
        let f = fixture().await;
        let note = f.coordinator.save_note(Note::new("shared", "v1")).await.unwrap();
        f.coordinator.background().wait_idle().await;

        let path = RemoteLayout::default().note_path(&note.id);
        let mut remote_edit = note.clone();
        remote_edit.body = "edited elsewhere".into();
        remote_edit.modified_at = Note::next_modified_at(note.modified_at);
        f.remote.put(&path, encode_note(&remote_edit).unwrap());

        f.network.set_reachable(false);
        f.coordinator.delete_note(&note.id).await.unwrap();
        f.coordinator.background().wait_idle().await;
        f.network.set_reachable(true);

        let report = f.coordinator.sync().await;
        assert_eq!(report.conflicts, 1);
        let restored = f.coordinator.notes().fetch(&note.id).await.unwrap();
        assert_eq!(restored.body, "edited elsewhere");
        assert_eq!(restored.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_remote_delete_removes_synced_local_note() {
        let f = fixture().await;
        let note = f.coordinator.save_note(Note::new("x", "")).await.unwrap();
        f.coordinator.background().wait_idle().await;

        f.remote.remove(&RemoteLayout::default().note_path(&note.id));
        let report = f.coordinator.sync().await;
        assert_eq!(report.removed, 1);
        assert!(f.coordinator.notes().fetch(&note.id).await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_remote_file_is_not_refetched() {
        let f = fixture().await;
        f.remote.put("notes/broken.md", "no front matter here");

        let first = f.coordinator.sync().await;
        assert_eq!(first.errors, 1);
        let second = f.coordinator.sync().await;
        assert_eq!(second.errors, 0);
        assert_eq!(f.coordinator.notes().count().await, 0);
    }

    #[tokio::test]
    async fn test_configuration_status() {
        let f = fixture().await;
        f.network.set_reachable(false);
        let status = f.coordinator.configuration_status().await;
        assert_eq!(
            status,
            ConfigurationStatus {
                auth_configured: true,
                repo_configured: true,
                network_reachable: false,
            }
        );
    }
}
