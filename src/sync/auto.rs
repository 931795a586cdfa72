//! Auto-sync driver.
//!
//! Runs a sync cycle every `interval` while the app is in the foreground and
//! the network is reachable. It waits on reachability and foreground changes
//! and never polls a dead network. Once both are true again, it syncs
//! immediately.

use crate::sync::coordinator::SyncCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct AutoSync {
    foreground: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AutoSync {
    /// Start the driver. The app starts in the foreground.
    pub fn spawn(coordinator: Arc<SyncCoordinator>, interval: Duration) -> Self {
        let (foreground, foreground_rx) = watch::channel(true);
        let handle = tokio::spawn(run(coordinator, interval, foreground_rx));
        info!("[AutoSync] Started, interval {}s", interval.as_secs());
        Self { foreground, handle }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.send_if_modified(|current| {
            let changed = *current != foreground;
            *current = foreground;
            changed
        });
    }

    pub fn stop(self) {
        self.handle.abort();
        info!("[AutoSync] Stopped");
    }
}

async fn run(
    coordinator: Arc<SyncCoordinator>,
    interval: Duration,
    mut foreground: watch::Receiver<bool>,
) {
    let mut reachable = coordinator.network().subscribe();

    loop {
        while !(*foreground.borrow_and_update() && *reachable.borrow_and_update()) {
            debug!("[AutoSync] Waiting for foreground and network");
            tokio::select! {
                r = foreground.changed() => {
                    if r.is_err() {
                        return;
                    }
                }
                r = reachable.changed() => {
                    if r.is_err() {
                        return;
                    }
                }
            }
        }

        let report = coordinator.sync().await;
        debug!("[AutoSync] Cycle finished: {}", report);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            r = foreground.changed() => {
                if r.is_err() {
                    return;
                }
            }
            r = reachable.changed() => {
                if r.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;
    use crate::storage::{CommitQueue, NoteStore};
    use crate::sync::coordinator::SyncComponents;
    use crate::sync::credentials::MemoryCredentialStore;
    use crate::sync::ledger::SyncLedger;
    use crate::sync::memory::MemoryRemote;
    use crate::sync::network::NetworkMonitor;
    use crate::sync::remote::RemoteLayout;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_syncs_when_network_returns() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let network = NetworkMonitor::new(false);
        let components = SyncComponents {
            notes: Arc::new(NoteStore::open(temp.path().join("n.json")).await),
            queue: Arc::new(CommitQueue::open(temp.path().join("q.json")).await),
            remote: remote.clone(),
            credentials: Arc::new(MemoryCredentialStore::with_token("t")),
            network: network.clone(),
        };
        let ledger = SyncLedger::open(temp.path().join("s.json")).await;
        let coordinator = SyncCoordinator::new(components, ledger, RemoteLayout::default(), true);

        coordinator.save_note(Note::new("offline", "")).await.unwrap();
        coordinator.background().wait_idle().await;

        let auto = AutoSync::spawn(coordinator.clone(), Duration::from_secs(3600));
        tokio::task::yield_now().await;
        assert_eq!(remote.file_count(), 0);

        network.set_reachable(true);
        let mut count = coordinator.queue().watch_count();
        tokio::time::timeout(Duration::from_secs(5), count.wait_for(|n| *n == 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.file_count(), 1);
        auto.stop();
    }
}
