//! NetworkMonitor - current reachability plus transition notifications.
//!
//! Reachability is a `watch` channel so auto-sync can sleep until it flips
//! instead of polling a dead network. The value is fed either by the built-in
//! TCP probe or by the embedding app via `set_reachable`.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_reachable: bool) -> Self {
        let (tx, _) = watch::channel(initially_reachable);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a reachability observation; subscribers wake only on transitions.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!(
                "[Network] {}",
                if reachable { "Reachable" } else { "Unreachable" }
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// One TCP connect attempt to `host` (`host:port`).
    pub async fn probe(host: &str) -> bool {
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(host)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("[Network] Probe to {} failed: {}", host, e);
                false
            }
            Err(_) => {
                debug!("[Network] Probe to {} timed out", host);
                false
            }
        }
    }

    /// Probe `host` every `interval` until the handle is aborted.
    pub fn spawn_probe(&self, host: String, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reachable = Self::probe(&host).await;
                monitor.set_reachable(reachable);
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
