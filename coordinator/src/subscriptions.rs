//! Remote subscription multiplexer.
//!
//! One realtime subscription per registered table, keyed by remote table
//! name. The pause/resume bracket exists for push: while the engine writes
//! a table remotely, that table's subscription is torn down so the
//! gateway's echo of our own writes never reaches the trigger path. The
//! bracket is per-table — a global pause would go blind to cross-table
//! changes during a multi-table push.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_engine::{RemoteEvent, RemoteGateway, Result, SubscriptionId, SyncContext, TableEngine, TableName};
use tokio::task::JoinHandle;

/// Callback invoked for every event arriving over any subscription.
pub type RemoteEventHandler = Arc<dyn Fn(RemoteEvent) + Send + Sync>;

struct ActiveSubscription {
    id: SubscriptionId,
    forward: JoinHandle<()>,
}

/// Per-table realtime subscription registry.
pub struct SubscriptionMux {
    gateway: Arc<dyn RemoteGateway>,
    active: DashMap<TableName, ActiveSubscription>,
    handler: Mutex<Option<(RemoteEventHandler, SyncContext)>>,
    enabled: AtomicBool,
}

impl SubscriptionMux {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            gateway,
            active: DashMap::new(),
            handler: Mutex::new(None),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Number of currently open subscriptions.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Open a subscription for every engine. Idempotent.
    pub async fn enable(
        &self,
        engines: &[TableEngine],
        ctx: SyncContext,
        handler: RemoteEventHandler,
    ) -> Result<()> {
        if self.enabled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *self.handler.lock() = Some((handler, ctx));
        for engine in engines {
            self.open(engine).await?;
        }
        Ok(())
    }

    /// Tear down every subscription. Idempotent.
    pub async fn disable(&self) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        let tables: Vec<TableName> = self.active.iter().map(|e| e.key().clone()).collect();
        for table in tables {
            self.close(&table).await;
        }
        *self.handler.lock() = None;
    }

    /// Tear down one table's subscription ahead of its push. Returns true
    /// when there was one to pause.
    pub async fn pause(&self, remote_table: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.close(remote_table).await
    }

    /// Re-open a table's subscription after its push, success or failure.
    pub async fn resume(&self, engine: &TableEngine) {
        if !self.is_enabled() {
            return;
        }
        if let Err(error) = self.open(engine).await {
            // Not fatal to the cycle; the next explicit enable reopens it.
            tracing::warn!(
                table = %engine.descriptor().label,
                %error,
                "failed to re-open remote subscription after push"
            );
        }
    }

    async fn open(&self, engine: &TableEngine) -> Result<()> {
        let Some((handler, ctx)) = self.handler.lock().clone() else {
            return Ok(());
        };
        let (id, mut events) = engine.subscribe_remote(&ctx).await?;
        let label = engine.descriptor().label.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handler(event);
            }
            tracing::debug!(table = %label, "remote subscription feed closed");
        });
        self.active.insert(
            engine.descriptor().remote_table.clone(),
            ActiveSubscription { id, forward },
        );
        Ok(())
    }

    async fn close(&self, remote_table: &str) -> bool {
        let Some((_, subscription)) = self.active.remove(remote_table) else {
            return false;
        };
        subscription.forward.abort();
        if let Err(error) = self.gateway.unsubscribe(&subscription.id).await {
            tracing::warn!(table = %remote_table, %error, "failed to unsubscribe cleanly");
        }
        true
    }
}
