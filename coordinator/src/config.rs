//! Coordinator configuration.

use std::fmt;
use std::sync::Arc;
use tether_engine::{SyncContext, TimeProvider, WallClock};

/// Default debounce window for auto-sync triggers.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3000;

/// Construction-time options for the coordinator.
#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Quiet window before a scheduled sync fires.
    pub debounce_ms: u64,
    /// Source of cycle timestamps. Defaults to the local wall clock; feed
    /// in server time where client clocks cannot be trusted.
    pub time_provider: Arc<dyn TimeProvider>,
    /// Default context merged under every per-call context.
    pub default_context: SyncContext,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            time_provider: Arc::new(WallClock),
            default_context: SyncContext::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn with_default_context(mut self, ctx: SyncContext) -> Self {
        self.default_context = ctx;
        self
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("debounce_ms", &self.debounce_ms)
            .field("default_context", &self.default_context)
            .finish_non_exhaustive()
    }
}
