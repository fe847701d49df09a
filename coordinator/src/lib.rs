//! # Tether Coordinator
//!
//! Orchestration layer over [`tether_engine`]: runs pull/push cycles across
//! all registered tables, reacts to local changes through a debounced
//! trigger, multiplexes realtime subscriptions and fans out typed events.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_coordinator::{CoordinatorConfig, SyncCoordinator};
//! use tether_engine::{MemoryGateway, MemoryStore, SyncContext, SyncDescriptor};
//!
//! # async fn demo() -> tether_engine::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let gateway = Arc::new(MemoryGateway::new());
//!
//! let coordinator = SyncCoordinator::new(
//!     store,
//!     gateway,
//!     vec![SyncDescriptor::new("tasks", "tasks").with_scope("user_id")],
//!     CoordinatorConfig::new().with_default_context(SyncContext::for_user("U1")),
//! )?;
//!
//! // Explicit cycle.
//! coordinator.sync_now(None).await?;
//!
//! // Local changes now schedule debounced cycles; remote changes too.
//! coordinator.start();
//! coordinator.enable_remote_subscriptions().await?;
//! # Ok(())
//! # }
//! ```

pub mod autosync;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod state;
pub mod subscriptions;

pub use autosync::{AutoSync, Debouncer};
pub use config::{CoordinatorConfig, DEFAULT_DEBOUNCE_MS};
pub use coordinator::SyncCoordinator;
pub use events::{DeltaSummary, PatchSummary, SyncEvent};
pub use state::SyncState;
pub use subscriptions::{RemoteEventHandler, SubscriptionMux};
