//! End-to-end sync scenarios against the in-memory remote.

use anyhow::Result;
use chrono::Duration;
use notesync::models::{Note, SyncStatus};
use notesync::storage::{CommitQueue, NoteStore};
use notesync::sync::codec::encode_note;
use notesync::sync::ledger::SyncLedger;
use notesync::sync::{
    MemoryCredentialStore, MemoryRemote, NetworkMonitor, RemoteLayout, Resolution,
    SyncComponents, SyncCoordinator,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_device(
    dir: &Path,
    remote: Arc<MemoryRemote>,
    network: NetworkMonitor,
) -> Arc<SyncCoordinator> {
    let components = SyncComponents {
        notes: Arc::new(NoteStore::open(dir.join("notes.json")).await),
        queue: Arc::new(CommitQueue::open(dir.join("queue.json")).await),
        remote,
        credentials: Arc::new(MemoryCredentialStore::with_token("ghp_test")),
        network,
    };
    let ledger = SyncLedger::open(dir.join("sync_state.json")).await;
    SyncCoordinator::new(components, ledger, RemoteLayout::default(), true)
}

fn note_path(note: &Note) -> String {
    RemoteLayout::default().note_path(&note.id)
}

#[tokio::test]
async fn test_offline_capture_syncs_when_network_returns() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let network = NetworkMonitor::new(false);
    let device = open_device(temp.path(), remote.clone(), network.clone()).await;

    let note = device.save_note(Note::new("A", "captured offline")).await?;
    device.background().wait_idle().await;

    let stored = device.notes().fetch(&note.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(device.pending_count().await, 1);
    assert_eq!(remote.file_count(), 0);

    network.set_reachable(true);
    let report = device.sync().await;

    assert_eq!(report.pushed, 1);
    let stored = device.notes().fetch(&note.id).await.unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(device.pending_count().await, 0);
    assert!(remote.get(&note_path(&note)).is_some());
    Ok(())
}

#[tokio::test]
async fn test_edits_before_drain_coalesce() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let network = NetworkMonitor::new(false);
    let device = open_device(temp.path(), remote.clone(), network.clone()).await;

    let mut note = device.save_note(Note::new("draft", "v1")).await?;
    note.body = "v2".into();
    device.save_note(note.clone()).await?;
    device.background().wait_idle().await;

    let intents = device.queue().dequeue_all().await;
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].payload.as_ref().unwrap().body, "v2");

    network.set_reachable(true);
    device.sync().await;
    assert_eq!(remote.write_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pending_intent_survives_restart() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());

    let id = {
        let device = open_device(temp.path(), remote.clone(), NetworkMonitor::new(false)).await;
        let note = device.save_note(Note::new("durable", "")).await?;
        device.background().wait_idle().await;
        note.id
    };

    let network = NetworkMonitor::new(true);
    let device = open_device(temp.path(), remote.clone(), network).await;
    assert_eq!(device.pending_count().await, 1);
    assert!(device.queue().contains(&id).await);

    device.sync().await;
    assert_eq!(
        device.notes().fetch(&id).await.unwrap().sync_status,
        SyncStatus::Synced
    );
    assert_eq!(device.pending_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_pending_note_without_intent_is_recovered() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());

    // Note written, process gone before the enqueue.
    let store = NoteStore::open(temp.path().join("notes.json")).await;
    let orphan = store.save(Note::new("orphan", "")).await?;
    drop(store);

    let device = open_device(temp.path(), remote.clone(), NetworkMonitor::new(true)).await;
    let report = device.sync().await;

    assert_eq!(report.pushed, 1);
    assert!(remote.get(&note_path(&orphan)).is_some());
    Ok(())
}

#[tokio::test]
async fn test_fresh_install_converges() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    for i in 0..5 {
        let note = Note::new(format!("remote {}", i), "from another device");
        remote.put(&note_path(&note), encode_note(&note)?);
    }
    remote.put("README.md", "# notes");

    let device = open_device(temp.path(), remote.clone(), NetworkMonitor::new(true)).await;
    let report = device.sync().await;

    assert_eq!(report.pulled, 5);
    let notes = device.notes().fetch_all().await;
    assert_eq!(notes.len(), 5);
    assert!(notes.iter().all(|n| n.sync_status == SyncStatus::Synced));
    assert_eq!(device.pending_count().await, 0);

    // Nothing new on the second cycle.
    let again = device.sync().await;
    assert_eq!(again.pulled, 0);
    assert_eq!(remote.write_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_two_devices_converge() -> Result<()> {
    let remote = Arc::new(MemoryRemote::new());
    let (dir_a, dir_b) = (TempDir::new()?, TempDir::new()?);
    let a = open_device(dir_a.path(), remote.clone(), NetworkMonitor::new(true)).await;
    let b = open_device(dir_b.path(), remote.clone(), NetworkMonitor::new(true)).await;

    let note = a.save_note(Note::new("shared", "from a")).await?;
    a.background().wait_idle().await;
    b.sync().await;

    let mut on_b = b.notes().fetch(&note.id).await.unwrap();
    assert_eq!(on_b.body, "from a");

    on_b.body = "edited on b".into();
    b.save_note(on_b).await?;
    b.background().wait_idle().await;

    a.sync().await;
    let on_a = a.notes().fetch(&note.id).await.unwrap();
    assert_eq!(on_a.body, "edited on b");
    assert_eq!(on_a.sync_status, SyncStatus::Synced);
    Ok(())
}

#[tokio::test]
async fn test_newer_remote_version_wins_without_local_edit() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let device = open_device(temp.path(), remote.clone(), NetworkMonitor::new(true)).await;

    let note = device.save_note(Note::new("lww", "local")).await?;
    device.background().wait_idle().await;

    let mut newer = note.clone();
    newer.body = "remote".into();
    newer.modified_at = note.modified_at + Duration::minutes(5);
    remote.put(&note_path(&note), encode_note(&newer)?);

    let report = device.pull().await?;
    assert_eq!(report.pulled, 1);
    let local = device.notes().fetch(&note.id).await.unwrap();
    assert!(local.same_content(&newer));
    assert_eq!(local.sync_status, SyncStatus::Synced);
    Ok(())
}

#[tokio::test]
async fn test_conflict_holds_note_until_fresh_edit() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let network = NetworkMonitor::new(true);
    let device = open_device(temp.path(), remote.clone(), network.clone()).await;

    let note = device.save_note(Note::new("contested", "base")).await?;
    device.background().wait_idle().await;
    let path = note_path(&note);

    // Another device moves the remote on.
    let mut theirs = note.clone();
    theirs.body = "theirs".into();
    theirs.modified_at = note.modified_at + Duration::seconds(1);
    remote.put(&path, encode_note(&theirs)?);

    network.set_reachable(false);
    let mut ours = device.notes().fetch(&note.id).await.unwrap();
    ours.body = "ours".into();
    device.save_note(ours).await?;
    device.background().wait_idle().await;
    network.set_reachable(true);

    let report = device.push().await?;
    assert_eq!(report.conflicts, 1);

    let local = device.notes().fetch(&note.id).await.unwrap();
    assert_eq!(local.body, "ours");
    assert_eq!(local.sync_status, SyncStatus::Conflict);
    assert_eq!(remote.get(&path).unwrap(), encode_note(&theirs)?);

    let conflicts = device.conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].1.as_ref().unwrap().body, "theirs");

    // Held: further cycles neither write nor touch local content.
    let writes = remote.write_count();
    let report = device.sync().await;
    assert_eq!(report.held, 1);
    assert_eq!(remote.write_count(), writes);
    assert_eq!(device.notes().fetch(&note.id).await.unwrap().body, "ours");

    // A fresh edit goes out on top of the remote version.
    let mut fresh = device.notes().fetch(&note.id).await.unwrap();
    fresh.body = "ours, revised".into();
    device.save_note(fresh.clone()).await?;
    device.background().wait_idle().await;

    let local = device.notes().fetch(&note.id).await.unwrap();
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(device.pending_count().await, 0);
    assert!(device.conflicts().await.is_empty());
    let pushed = String::from_utf8(remote.get(&path).unwrap())?;
    assert!(pushed.ends_with("ours, revised"));
    Ok(())
}

#[tokio::test]
async fn test_resolve_conflict_keep_remote() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let network = NetworkMonitor::new(true);
    let device = open_device(temp.path(), remote.clone(), network.clone()).await;

    let note = device.save_note(Note::new("contested", "base")).await?;
    device.background().wait_idle().await;

    let mut theirs = note.clone();
    theirs.body = "theirs".into();
    theirs.modified_at = note.modified_at + Duration::seconds(1);
    remote.put(&note_path(&note), encode_note(&theirs)?);

    network.set_reachable(false);
    let mut ours = device.notes().fetch(&note.id).await.unwrap();
    ours.body = "ours".into();
    device.save_note(ours).await?;
    device.background().wait_idle().await;
    network.set_reachable(true);
    device.sync().await;

    device
        .resolve_conflict(&note.id, Resolution::KeepRemote)
        .await?;

    let local = device.notes().fetch(&note.id).await.unwrap();
    assert!(local.same_content(&theirs));
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(device.pending_count().await, 0);

    let writes = remote.write_count();
    device.sync().await;
    assert_eq!(remote.write_count(), writes);
    Ok(())
}

#[tokio::test]
async fn test_resolve_conflict_keep_local() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let network = NetworkMonitor::new(true);
    let device = open_device(temp.path(), remote.clone(), network.clone()).await;

    let note = device.save_note(Note::new("contested", "base")).await?;
    device.background().wait_idle().await;

    let mut theirs = note.clone();
    theirs.body = "theirs".into();
    remote.put(&note_path(&note), encode_note(&theirs)?);

    network.set_reachable(false);
    let mut ours = device.notes().fetch(&note.id).await.unwrap();
    ours.body = "ours".into();
    device.save_note(ours).await?;
    device.background().wait_idle().await;
    network.set_reachable(true);
    device.sync().await;

    device
        .resolve_conflict(&note.id, Resolution::KeepLocal)
        .await?;
    let report = device.sync().await;

    assert_eq!(report.pushed, 1);
    let pushed = String::from_utf8(remote.get(&note_path(&note)).unwrap())?;
    assert!(pushed.ends_with("ours"));
    assert_eq!(
        device.notes().fetch(&note.id).await.unwrap().sync_status,
        SyncStatus::Synced
    );
    Ok(())
}

#[tokio::test]
async fn test_change_notifications_reach_subscribers() -> Result<()> {
    let temp = TempDir::new()?;
    let remote = Arc::new(MemoryRemote::new());
    let incoming = Note::new("incoming", "");
    remote.put(&note_path(&incoming), encode_note(&incoming)?);

    let device = open_device(temp.path(), remote.clone(), NetworkMonitor::new(true)).await;
    let mut changes = device.notes().subscribe();
    device.sync().await;

    assert!(changes.try_recv().is_ok());
    Ok(())
}
