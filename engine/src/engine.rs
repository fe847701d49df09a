//! Per-table sync engine wiring.
//!
//! A [`TableEngine`] owns everything needed to pull and push one table: the
//! descriptor, both trait seams, the reentrancy guard and a time source.
//! The pull and push algorithms live in their own modules.

use crate::accessor::LocalAccessor;
use crate::context::SyncContext;
use crate::descriptor::SyncDescriptor;
use crate::error::Result;
use crate::guard::ReentrancyGuard;
use crate::local::LocalStore;
use crate::remote::{RemoteEvent, RemoteFilter, RemoteGateway, SubscriptionId};
use crate::time::TimeProvider;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The pull/push engine for one synced table.
pub struct TableEngine {
    pub(crate) descriptor: Arc<SyncDescriptor>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) gateway: Arc<dyn RemoteGateway>,
    pub(crate) accessor: LocalAccessor,
    pub(crate) time: Arc<dyn TimeProvider>,
    default_ctx: SyncContext,
}

impl TableEngine {
    pub fn new(
        descriptor: Arc<SyncDescriptor>,
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        guard: Arc<ReentrancyGuard>,
        time: Arc<dyn TimeProvider>,
        default_ctx: SyncContext,
    ) -> Self {
        let accessor = LocalAccessor::new(Arc::clone(&store), guard);
        Self {
            descriptor,
            store,
            gateway,
            accessor,
            time,
            default_ctx,
        }
    }

    /// The table's descriptor.
    pub fn descriptor(&self) -> &SyncDescriptor {
        &self.descriptor
    }

    /// Merge a per-call context over the engine's default.
    pub fn resolve_ctx(&self, overlay: &SyncContext) -> SyncContext {
        self.default_ctx.merged_with(overlay)
    }

    /// Open a realtime subscription on the remote table, filtered by scope
    /// when one applies.
    pub async fn subscribe_remote(
        &self,
        ctx: &SyncContext,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<RemoteEvent>)> {
        let ctx = self.resolve_ctx(ctx);
        let filter = self
            .descriptor
            .scope_filter(&ctx)
            .map(|(field, value)| RemoteFilter::eq(field, value));
        self.gateway
            .subscribe(&self.descriptor.remote_table, filter)
            .await
    }
}
