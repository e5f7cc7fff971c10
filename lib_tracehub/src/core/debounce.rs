//! # Debounce Scheduler
//!
//! Coalesces bursts of "trace changed" signals into a single broadcast per
//! key. Each key has at most one pending timer; a new signal cancels it and
//! starts over, so the broadcast fires one quiet window after the *last*
//! signal of a burst.
//!
//! Timers are small spawned tasks racing a `CancellationToken` against a
//! sleep. When the sleep wins they post `DebounceElapsed` back to the owning
//! worker, tagged with a generation number. A timer can finish its sleep just
//! as a newer signal replaces it, so the worker only honours the generation it
//! currently holds for the key.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::core::command::{Command, WeakCommandSender};
use crate::core::registry::TraceKey;

/// A scheduled, cancellable broadcast for one key.
#[derive(Debug)]
struct PendingBroadcast {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct DebounceScheduler {
    window: Duration,
    pending: HashMap<TraceKey, PendingBroadcast>,
    next_generation: u64,
}

impl DebounceScheduler {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_generation: 1,
        }
    }

    /// (Re)starts the quiet window for `key`.
    ///
    /// Returns `true` if an earlier pending timer was replaced.
    pub(crate) fn schedule(&mut self, key: &TraceKey, commands: &WeakCommandSender) -> bool {
        let generation = self.next_generation;
        self.next_generation += 1;

        let cancel = CancellationToken::new();
        let replaced = self
            .pending
            .insert(
                key.clone(),
                PendingBroadcast {
                    generation,
                    cancel: cancel.clone(),
                },
            )
            .map(|previous| previous.cancel.cancel())
            .is_some();

        let window = self.window;
        let commands = commands.clone();
        let key = key.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(trace_key = %key, generation, "debounce timer superseded");
                }
                _ = sleep(window) => {
                    // No live sender means the worker is gone; nothing left to notify.
                    if let Some(commands) = commands.upgrade() {
                        let _ = commands.send(Command::DebounceElapsed { key, generation });
                    }
                }
            }
        });

        replaced
    }

    /// Claims an elapsed timer.
    ///
    /// Returns `true` (and forgets the entry) only when `generation` is the
    /// timer currently pending for `key`.
    pub(crate) fn take_elapsed(&mut self, key: &TraceKey, generation: u64) -> bool {
        match self.pending.get(key) {
            Some(entry) if entry.generation == generation => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancels every pending timer. Returns how many were cancelled.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.cancel.cancel();
        }
        count
    }

    /// Keys with a timer waiting to fire.
    pub(crate) fn pending_keys(&self) -> BTreeSet<TraceKey> {
        self.pending.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn elapsed(cmd: Command) -> (TraceKey, u64) {
        match cmd {
            Command::DebounceElapsed { key, generation } => (key, generation),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_yields_a_single_elapsed_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = DebounceScheduler::new(Duration::from_millis(300));
        let key = TraceKey::from("t1");

        assert!(!scheduler.schedule(&key, &tx.downgrade()));
        for _ in 0..4 {
            sleep(Duration::from_millis(10)).await;
            assert!(scheduler.schedule(&key, &tx.downgrade()));
        }

        sleep(Duration::from_millis(400)).await;

        let (fired_key, generation) = elapsed(rx.try_recv().unwrap());
        assert_eq!(fired_key, key);
        assert!(rx.try_recv().is_err());
        assert!(scheduler.take_elapsed(&key, generation));
        assert!(!scheduler.pending_keys().contains("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = DebounceScheduler::new(Duration::from_millis(300));
        let key = TraceKey::from("t1");

        scheduler.schedule(&key, &tx.downgrade());
        scheduler.schedule(&key, &tx.downgrade());

        assert!(!scheduler.take_elapsed(&key, 1));
        assert!(scheduler.pending_keys().contains("t1"));
        assert!(scheduler.take_elapsed(&key, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_suppresses_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = DebounceScheduler::new(Duration::from_millis(300));

        scheduler.schedule(&TraceKey::from("a"), &tx.downgrade());
        scheduler.schedule(&TraceKey::from("b"), &tx.downgrade());
        assert_eq!(scheduler.pending_keys().len(), 2);

        assert_eq!(scheduler.cancel_all(), 2);
        sleep(Duration::from_secs(1)).await;

        assert!(rx.try_recv().is_err());
        assert!(scheduler.pending_keys().is_empty());
    }
}
