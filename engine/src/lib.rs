//! # Tether Engine
//!
//! Per-table pull/push synchronization between an offline-first local
//! database and a remote relational source.
//!
//! This crate is the core of Tether: it owns the coordination discipline —
//! increment-by-timestamp pulls, unique-key reconciliation, soft-delete
//! handling, last-write-wins merges and the reentrancy guard that keeps
//! sync-originated writes from re-triggering sync. It does *not* own a
//! database or a network client; both sides are consumed through narrow
//! trait seams.
//!
//! ## Design Principles
//!
//! - **Seams, not bindings**: the local database is a [`LocalStore`], the
//!   remote source a [`RemoteGateway`]. Anything that satisfies the
//!   contracts can participate.
//! - **Row-wise last-write-wins**: conflicts resolve by timestamp, remote
//!   winning ties. No field merging, no CRDTs.
//! - **Logical deletion**: the engine never physically removes a remote
//!   row; deletion propagates as a boolean flag.
//! - **Suppression by counting**: each write the engine performs leaves one
//!   credit on the [`ReentrancyGuard`]; the change notification it causes
//!   consumes it. Counters survive asynchronous fan-out where flags race.
//!
//! ## Core Concepts
//!
//! ### Descriptors
//!
//! A [`SyncDescriptor`] statically configures one synced table: key fields,
//! timestamp fields, the soft-delete flag, optional per-user scope,
//! optional unique keys and the two row mappings.
//!
//! ### Pull
//!
//! [`TableEngine::pull`] pages the remote delta since the last checkpoint
//! (inclusive `>=` filter), matches rows to local records by remote id and
//! then by unique key, and emits a [`TablePatch`] of creates, updates
//! (strictly newer rows only) and deletes for atomic application.
//!
//! ### Push
//!
//! [`TableEngine::push`] reconciles the local delta outward: soft-deletes
//! first, then upserts — skipping records whose remote copy is at least as
//! new — and writes the assigned remote identity back under suppression.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tether_engine::{
//!     LocalStore, MemoryGateway, MemoryStore, ReentrancyGuard, SyncContext, SyncDescriptor,
//!     TableEngine, WallClock,
//! };
//!
//! # async fn demo() -> tether_engine::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let gateway = Arc::new(MemoryGateway::new());
//! let descriptor = Arc::new(SyncDescriptor::new("tasks", "tasks").with_scope("user_id"));
//!
//! let engine = TableEngine::new(
//!     descriptor,
//!     store.clone(),
//!     gateway,
//!     Arc::new(ReentrancyGuard::new()),
//!     Arc::new(WallClock),
//!     SyncContext::for_user("U1"),
//! );
//!
//! // Pull the remote delta and apply it atomically...
//! let outcome = engine.pull(None, &SyncContext::new()).await?;
//! let mut patch = HashMap::new();
//! patch.insert("tasks".to_string(), outcome.patch);
//! let deltas = store.apply_sync_patch(patch, 0).await?;
//!
//! // ...then push whatever the local side had changed.
//! if let Some(deltas) = deltas.get("tasks") {
//!     engine.push(deltas, &SyncContext::new()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod fields;
pub mod guard;
pub mod local;
pub mod memory;
pub mod pull;
pub mod push;
pub mod remote;
pub mod time;

// Re-export main types at crate root
pub use accessor::LocalAccessor;
pub use context::SyncContext;
pub use descriptor::{
    KeyConfig, LocalToRemote, PushFilter, RemoteToLocal, ScopeConfig, SyncDescriptor,
    TimestampConfig, UniqueKeySpec,
};
pub use engine::TableEngine;
pub use error::{Error, Result};
pub use events::{EventBus, DEFAULT_EVENT_CAPACITY};
pub use guard::ReentrancyGuard;
pub use local::{ChangeNotice, LocalRecord, LocalStore, TableDeltas, TablePatch};
pub use memory::{MemoryGateway, MemoryStore};
pub use pull::{PullOutcome, PULL_PAGE_SIZE};
pub use push::{PushConflict, PushOutcome};
pub use remote::{
    render_json_path, RemoteEvent, RemoteEventKind, RemoteFilter, RemoteGateway, SubscriptionId,
};
pub use time::{ManualClock, TimeProvider, WallClock};

/// Type aliases for clarity
pub type TableName = String;
pub type RecordId = String;
pub type RemoteId = String;
pub type TimestampMs = i64;
