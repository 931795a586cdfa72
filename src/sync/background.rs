//! Background executor for detached work items.
//!
//! A submitted item runs on the tokio runtime and outlives the call that
//! submitted it. Items are never cancelled. Delivery of commits is
//! at-least-once: the intent is durable in the CommitQueue before the item is
//! submitted, so an item lost to a process exit is replayed by the next sync.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct BackgroundExecutor {
    in_flight: Arc<watch::Sender<usize>>,
}

/// Decrements the in-flight count even if the item panics.
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl BackgroundExecutor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            in_flight: Arc::new(tx),
        }
    }

    /// Run `work` detached. Must be called from within a tokio runtime.
    pub fn submit<F>(&self, label: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.in_flight.send_modify(|n| *n += 1);
        let guard = InFlightGuard(self.in_flight.clone());
        tokio::spawn(async move {
            let _guard = guard;
            debug!("[Background] Running {}", label);
            work.await;
        });
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until every submitted item has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in self, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_items_run_after_submitter_returns() {
        let executor = BackgroundExecutor::new();
        let done = Arc::new(AtomicUsize::new(0));

        fn submit_and_return(executor: &BackgroundExecutor, done: Arc<AtomicUsize>) {
            executor.submit("test", async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..3 {
            submit_and_return(&executor, done.clone());
        }
        executor.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_item_still_completes() {
        let executor = BackgroundExecutor::new();
        executor.submit("boom", async {
            panic!("work item failed");
        });
        executor.wait_idle().await;
        assert_eq!(executor.in_flight(), 0);
    }
}
