//! Time sources for cycle timestamps.
//!
//! Pull cycles record the instant observed *before* any page is fetched, so
//! the clock is a first-class seam: production deployments should feed in
//! server time to avoid client clock skew poisoning the checkpoint.

use crate::TimestampMs;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in integer milliseconds.
pub trait TimeProvider: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> TimestampMs;
}

/// The local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeProvider for WallClock {
    fn now_ms(&self) -> TimestampMs {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
///
/// Serves deterministic tests, and doubles as the injection point for hosts
/// that track server time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned to the given instant.
    pub fn new(start: TimestampMs) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Pin the clock to an instant.
    pub fn set(&self, ms: TimestampMs) {
        self.now.store(ms, Ordering::Release);
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: TimestampMs) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }
}

impl TimeProvider for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::Acquire)
    }
}
