//! # Remote Sync Poller
//!
//! A self-scheduling loop that keeps one trace fresh on the remote authority
//! while anybody is listening to it.
//!
//! ## Cycle
//! 1.  **Refresh**: ask the [`SyncClient`] to refresh the key with `force`
//!     set, bounded by the configured timeout.
//! 2.  **Inspect**: a terminal answer ends the loop. Failures (timeout,
//!     transport, status, decode) are logged and count as "no news".
//! 3.  **Sleep**: wait for the poll interval, then go again.
//!
//! Both the refresh call and the sleep race the poller's cancellation token.
//! The owning worker cancels that token when the key loses its last
//! subscriber or the hub shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::registry::TraceKey;
use crate::core::sync_client::{SyncClient, SyncError, SyncOutcome};
use crate::core::sync_tasks::SyncExit;

/// # Sync Poller
///
/// State for one key's polling loop. Built by the worker and consumed by
/// [`SyncPoller::run`] inside a spawned task.
pub struct SyncPoller {
    key: TraceKey,
    client: Arc<dyn SyncClient>,
    poll_interval: Duration,
    call_timeout: Duration,
}

impl SyncPoller {
    /// `call_timeout` bounds each refresh call, `poll_interval` the sleep between them.
    pub fn new(key: TraceKey, client: Arc<dyn SyncClient>, poll_interval: Duration, call_timeout: Duration) -> Self {
        Self {
            key,
            client,
            poll_interval,
            call_timeout,
        }
    }

    /// # Main Execution Loop
    ///
    /// Runs until the remote reports a terminal state or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> SyncExit {
        debug!(trace_key = %self.key, interval = ?self.poll_interval, "sync poller started");
        let mut cycle: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return SyncExit::Cancelled;
            }
            cycle += 1;

            // --- Phase 1: Refresh ---
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return SyncExit::Cancelled,
                outcome = self.refresh_once() => outcome,
            };

            // --- Phase 2: Inspect ---
            match outcome {
                Ok(result) if result.is_terminal => {
                    info!(trace_key = %self.key, cycle, "trace reached terminal state, polling stopped");
                    return SyncExit::Terminal;
                }
                Ok(result) => {
                    debug!(trace_key = %self.key, cycle, extra = ?result.extra, "sync refreshed");
                }
                Err(e) => {
                    warn!(trace_key = %self.key, cycle, error = %e, "sync call failed, retrying next interval");
                }
            }

            // --- Phase 3: Self-Schedule ---
            tokio::select! {
                _ = cancel.cancelled() => return SyncExit::Cancelled,
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    async fn refresh_once(&self) -> Result<SyncOutcome, SyncError> {
        request_with_timeout(self.client.as_ref(), &self.key, true, self.call_timeout).await
    }
}

/// Issues one refresh call, converting an elapsed deadline into
/// [`SyncError::Timeout`].
pub async fn request_with_timeout(
    client: &dyn SyncClient,
    key: &TraceKey,
    force: bool,
    call_timeout: Duration,
) -> Result<SyncOutcome, SyncError> {
    match timeout(call_timeout, client.request_sync(key, force)).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(call_timeout)),
    }
}
