//! Cycle orchestration across all registered tables.
//!
//! One cycle pulls every table, applies the aggregate patch inside the
//! suppression scope as a single atomic write, then pushes each table that
//! reported local changes — pausing that table's realtime subscription
//! around its push. At most one cycle runs at a time; overlapping
//! `sync_now` calls coalesce into shared completion, and changes that
//! arrive mid-cycle queue a compensation cycle.

use crate::autosync::{AutoSync, Debouncer};
use crate::config::CoordinatorConfig;
use crate::events::{DeltaSummary, PatchSummary, SyncEvent};
use crate::state::SyncState;
use crate::subscriptions::{RemoteEventHandler, SubscriptionMux};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{
    Error, EventBus, LocalStore, ReentrancyGuard, RemoteEvent, RemoteGateway, Result, SyncContext,
    SyncDescriptor, TableEngine, TableName, TimeProvider,
};
use tokio::sync::{broadcast, oneshot};

#[derive(Default)]
struct CycleGate {
    is_syncing: bool,
    has_pending_change: bool,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

struct Inner {
    engines: Vec<TableEngine>,
    store: Arc<dyn LocalStore>,
    guard: Arc<ReentrancyGuard>,
    time: Arc<dyn TimeProvider>,
    bus: EventBus<SyncEvent>,
    debouncer: Debouncer,
    state: Mutex<SyncState>,
    gate: Mutex<CycleGate>,
    mux: SubscriptionMux,
    autosync: Mutex<Option<AutoSync>>,
}

/// Orchestrates pull/push cycles over all registered tables.
///
/// Cheap to clone; all clones share the same coordinator.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator").finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Register the descriptors and wire up one engine per table. The
    /// descriptor set is immutable afterwards.
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        descriptors: Vec<SyncDescriptor>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor.local_table.clone()) {
                return Err(Error::DuplicateTable(descriptor.local_table.clone()));
            }
        }

        let guard = Arc::new(ReentrancyGuard::new());
        let engines: Vec<TableEngine> = descriptors
            .into_iter()
            .map(|descriptor| {
                TableEngine::new(
                    Arc::new(descriptor),
                    Arc::clone(&store),
                    Arc::clone(&gateway),
                    Arc::clone(&guard),
                    Arc::clone(&config.time_provider),
                    config.default_context.clone(),
                )
            })
            .collect();
        let registered_tables: Vec<TableName> = engines
            .iter()
            .map(|engine| engine.descriptor().local_table.clone())
            .collect();

        let inner = Arc::new(Inner {
            engines,
            store,
            guard,
            time: config.time_provider,
            bus: EventBus::default(),
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
            state: Mutex::new(SyncState {
                registered_tables,
                ..Default::default()
            }),
            gate: Mutex::new(CycleGate::default()),
            mux: SubscriptionMux::new(gateway),
            autosync: Mutex::new(None),
        });
        Ok(Self { inner })
    }

    /// Enable auto-sync: local changes schedule a debounced cycle.
    pub fn start(&self) {
        {
            let mut autosync = self.inner.autosync.lock();
            if autosync.is_some() {
                return;
            }
            let tables = self.inner.state.lock().registered_tables.clone();
            *autosync = Some(AutoSync::subscribe(
                &self.inner.store,
                tables,
                Arc::clone(&self.inner.guard),
                Inner::trigger_handle(&self.inner),
            ));
        }
        self.inner.update_state(|state| state.running = true);
    }

    /// Disable auto-sync, tear down realtime subscriptions and clear the
    /// debounce timer. An in-flight cycle runs to completion.
    pub async fn stop(&self) {
        if let Some(autosync) = self.inner.autosync.lock().take() {
            autosync.shutdown();
        }
        self.inner.debouncer.cancel();
        self.inner.mux.disable().await;
        self.inner.update_state(|state| state.running = false);
    }

    /// Run a cycle now, or join the one already running.
    ///
    /// While a cycle is running, callers are queued and resolved when it
    /// completes; their arrival also flags a compensation cycle. On failure
    /// every queued caller receives the same error.
    pub async fn sync_now(&self, ctx: Option<SyncContext>) -> Result<()> {
        Inner::sync_now(&self.inner, ctx).await
    }

    /// Open realtime subscriptions for every registered table. Remote
    /// events feed the same debounced trigger path as local changes.
    pub async fn enable_remote_subscriptions(&self) -> Result<()> {
        let handler = Inner::remote_event_handler(&self.inner);
        self.inner
            .mux
            .enable(&self.inner.engines, SyncContext::new(), handler)
            .await
    }

    /// Tear down all realtime subscriptions.
    pub async fn disable_remote_subscriptions(&self) {
        self.inner.mux.disable().await;
    }

    /// Register an event listener.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.bus.subscribe()
    }

    /// A snapshot of the coordinator's state.
    pub fn state(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    /// The shared reentrancy guard, for hosts that perform their own
    /// suppressed writes.
    pub fn guard(&self) -> Arc<ReentrancyGuard> {
        Arc::clone(&self.inner.guard)
    }
}

impl Inner {
    async fn sync_now(inner: &Arc<Inner>, ctx: Option<SyncContext>) -> Result<()> {
        let ctx = ctx.unwrap_or_default();

        let waiter = {
            let mut gate = inner.gate.lock();
            if gate.is_syncing {
                gate.has_pending_change = true;
                let (tx, rx) = oneshot::channel();
                gate.waiters.push(tx);
                Some(rx)
            } else {
                gate.is_syncing = true;
                None
            }
        };
        if let Some(rx) = waiter {
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Interrupted),
            };
        }

        // This call owns the runner slot until the gate is released.
        loop {
            let result = Inner::run_cycle(inner, &ctx).await;
            let (waiters, run_again) = {
                let mut gate = inner.gate.lock();
                let waiters = std::mem::take(&mut gate.waiters);
                let run_again = result.is_ok() && gate.has_pending_change;
                gate.has_pending_change = false;
                if !run_again {
                    gate.is_syncing = false;
                }
                (waiters, run_again)
            };
            match result {
                Ok(()) => {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(()));
                    }
                    if run_again {
                        tracing::debug!("changes arrived mid-cycle, running a compensation cycle");
                        continue;
                    }
                    return Ok(());
                }
                Err(error) => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(error.clone()));
                    }
                    inner.update_state(|state| state.errors += 1);
                    return Err(error);
                }
            }
        }
    }

    async fn run_cycle(inner: &Arc<Inner>, ctx: &SyncContext) -> Result<()> {
        // Captured before any page is fetched: rows written while paging is
        // under way must fall into the next cycle's window, not be lost.
        let cycle_start = inner.time.now_ms();
        let last_pulled_at = inner.store.last_pulled_at().await?;
        tracing::debug!(cycle_start, ?last_pulled_at, "sync cycle started");

        let mut patch = HashMap::new();
        for engine in &inner.engines {
            let descriptor = engine.descriptor();
            inner.mark_in_progress(&descriptor.label);
            let result = engine.pull(last_pulled_at, ctx).await;
            inner.clear_in_progress(&descriptor.label);
            match result {
                Ok(outcome) => {
                    inner.bus.emit(SyncEvent::Pulled {
                        label: descriptor.label.clone(),
                        summary: PatchSummary::from(&outcome.patch),
                    });
                    patch.insert(descriptor.local_table.clone(), outcome.patch);
                }
                Err(error) => {
                    // The cycle's patch is no longer consistent; no further
                    // table is attempted.
                    inner.bus.emit(SyncEvent::Error {
                        label: descriptor.label.clone(),
                        message: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }

        let deltas = match inner
            .guard
            .run_suppressed(inner.store.apply_sync_patch(patch, cycle_start))
            .await
        {
            Ok(deltas) => deltas,
            Err(error) => {
                inner.bus.emit(SyncEvent::Error {
                    label: "apply".into(),
                    message: error.to_string(),
                });
                return Err(error);
            }
        };

        for engine in &inner.engines {
            let descriptor = engine.descriptor();
            let Some(table_deltas) = deltas.get(&descriptor.local_table) else {
                continue;
            };
            if table_deltas.is_empty() {
                continue;
            }

            inner.mark_in_progress(&descriptor.label);
            let paused = inner.mux.pause(&descriptor.remote_table).await;
            let result = engine.push(table_deltas, ctx).await;
            if paused {
                inner.mux.resume(engine).await;
            }
            inner.clear_in_progress(&descriptor.label);

            match result {
                Ok(outcome) => {
                    for conflict in outcome.conflicts {
                        inner.bus.emit(SyncEvent::Conflict {
                            label: descriptor.label.clone(),
                            conflict,
                        });
                    }
                    inner.bus.emit(SyncEvent::Pushed {
                        label: descriptor.label.clone(),
                        summary: DeltaSummary::from(table_deltas),
                    });
                }
                Err(error) => {
                    inner.bus.emit(SyncEvent::Error {
                        label: descriptor.label.clone(),
                        message: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }

        inner.update_state(|state| state.last_sync_at = Some(cycle_start));
        Ok(())
    }

    /// Route an external change into the cycle machinery: queue a
    /// compensation cycle when one is running, otherwise debounce a fresh
    /// one.
    fn schedule_trigger(inner: &Arc<Inner>) {
        {
            let mut gate = inner.gate.lock();
            if gate.is_syncing {
                gate.has_pending_change = true;
                return;
            }
        }
        let weak = Arc::downgrade(inner);
        inner.debouncer.call(async move {
            let Some(inner) = weak.upgrade() else { return };
            if let Err(error) = Inner::sync_now(&inner, None).await {
                tracing::warn!(%error, "scheduled sync cycle failed");
            }
        });
    }

    fn trigger_handle(inner: &Arc<Inner>) -> Arc<dyn Fn() + Send + Sync> {
        let weak = Arc::downgrade(inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                Inner::schedule_trigger(&inner);
            }
        })
    }

    fn remote_event_handler(inner: &Arc<Inner>) -> RemoteEventHandler {
        let weak = Arc::downgrade(inner);
        Arc::new(move |event: RemoteEvent| {
            let Some(inner) = weak.upgrade() else { return };
            let label = inner
                .engines
                .iter()
                .map(TableEngine::descriptor)
                .find(|descriptor| descriptor.remote_table == event.table)
                .map(|descriptor| descriptor.label.clone())
                .unwrap_or_else(|| event.table.clone());
            inner.bus.emit(SyncEvent::RemoteChanged {
                label,
                kind: event.kind,
                row: event.row,
            });
            Inner::schedule_trigger(&inner);
        })
    }

    fn update_state(&self, mutate: impl FnOnce(&mut SyncState)) {
        let snapshot = {
            let mut state = self.state.lock();
            mutate(&mut state);
            state.clone()
        };
        self.bus.emit(SyncEvent::State { state: snapshot });
    }

    fn mark_in_progress(&self, label: &str) {
        self.update_state(|state| state.in_progress.push(label.to_owned()));
    }

    fn clear_in_progress(&self, label: &str) {
        self.update_state(|state| state.in_progress.retain(|l| l != label));
    }
}
