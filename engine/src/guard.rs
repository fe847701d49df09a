//! Reentrancy guard: tells sync-originated writes apart from user writes.
//!
//! Every write the engine performs against the local database will come back
//! around as a change notification, and an unguarded observer would schedule
//! another cycle for it — sync → write → sync, forever. A boolean "inside
//! sync" flag races once notifications are delivered asynchronously: the
//! flag is already lowered by the time the notification for a completed
//! write arrives. A counter survives that fan-out, because each suppressed
//! write leaves exactly one credit for the notification it will eventually
//! produce.
//!
//! Discipline: each suppressed write pushes +1; each observed change
//! notification pops one via [`ReentrancyGuard::check_and_decrement`]. The
//! pairing relies on the local database emitting exactly one change event
//! per atomic write.

use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide non-negative suppression counter.
///
/// Nested suppression composes by simple addition.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    depth: AtomicU64,
}

impl ReentrancyGuard {
    /// Create a guard with no suppressions outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current suppression depth.
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Acquire)
    }

    /// Run `work` with the counter raised.
    ///
    /// The matching decrement is *not* performed here: it is driven by the
    /// consumer observing the resulting change notification, which may fire
    /// well after `work` has returned.
    pub async fn run_suppressed<T, F>(&self, work: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.depth.fetch_add(1, Ordering::AcqRel);
        work.await
    }

    /// Classify an observed change notification.
    ///
    /// Returns `true` if the counter is zero — a genuine external change,
    /// let it through. Otherwise consumes one suppression credit and returns
    /// `false` — the change originated from sync, drop it.
    ///
    /// The counter never goes below zero.
    pub fn check_and_decrement(&self) -> bool {
        let mut current = self.depth.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return true;
            }
            match self.depth.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return false,
                Err(observed) => current = observed,
            }
        }
    }
}
