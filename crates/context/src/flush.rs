//! Background flush scheduler.
//!
//! A single tokio task wakes on a fixed period and runs one
//! [`ContextStore::flush_cycle`]. Shutdown is a token cancellation
//! followed by awaiting the join handle, so the final cycle always
//! completes before the process exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::tiered::ContextStore;

pub struct FlushScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Spawn the scheduler task.
    pub fn spawn(store: Arc<ContextStore>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // Skip the immediate first tick; there is nothing to flush
            // at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = store.flush_cycle().await;
                        if stats.replicated > 0 || stats.flushed > 0 {
                            tracing::debug!(
                                replicated = stats.replicated,
                                flushed = stats.flushed,
                                "flush cycle complete"
                            );
                        }
                    }
                }
            }
            tracing::debug!("flush scheduler stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "flush scheduler task panicked");
        }
    }
}
