//! Auto-sync: debounced reaction to local change notifications.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{ChangeNotice, LocalStore, ReentrancyGuard, TableName};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Trailing-edge debounce: each call restarts the quiet window, and only
/// the last submitted work runs once the window elapses.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `work` to run after the quiet window, replacing any work
    /// already waiting.
    pub fn call<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let mut pending = self.pending.lock();
        if let Some(waiting) = pending.take() {
            waiting.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        }));
    }

    /// Drop whatever is waiting without running it.
    pub fn cancel(&self) {
        if let Some(waiting) = self.pending.lock().take() {
            waiting.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The change-stream side of auto-sync: watches the local database's
/// notifications, drops the ones sync itself caused, and fires the trigger
/// for the rest.
pub struct AutoSync {
    task: JoinHandle<()>,
}

impl AutoSync {
    /// Subscribe to the store's change stream.
    ///
    /// Every notice touching one of `tables` is classified through the
    /// guard; genuine external changes invoke `on_trigger`.
    pub fn subscribe(
        store: &Arc<dyn LocalStore>,
        tables: Vec<TableName>,
        guard: Arc<ReentrancyGuard>,
        on_trigger: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        let mut changes = store.observe_changes();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ChangeNotice { tables: touched }) => {
                        if !touched.iter().any(|t| tables.contains(t)) {
                            continue;
                        }
                        if guard.check_and_decrement() {
                            on_trigger();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Notifications were lost; the guard pairing may be
                        // off until the next quiescent cycle. Sync anyway.
                        tracing::warn!(missed, "change stream lagged, scheduling a catch-up sync");
                        on_trigger();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }

    /// Stop watching the change stream.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}
