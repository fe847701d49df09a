//! The coordinator's event vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_engine::{PushConflict, RemoteEventKind, TableDeltas, TablePatch};

use crate::state::SyncState;

/// Size summary of a pull patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl From<&TablePatch> for PatchSummary {
    fn from(patch: &TablePatch) -> Self {
        Self {
            created: patch.created.len(),
            updated: patch.updated.len(),
            deleted: patch.deleted.len(),
        }
    }
}

/// Size summary of a pushed delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl From<&TableDeltas> for DeltaSummary {
    fn from(deltas: &TableDeltas) -> Self {
        Self {
            created: deltas.created.len(),
            updated: deltas.updated.len(),
            deleted: deltas.deleted.len(),
        }
    }
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A table's pull completed.
    Pulled { label: String, summary: PatchSummary },
    /// A table's push completed.
    Pushed { label: String, summary: DeltaSummary },
    /// A push was skipped because the remote copy was at least as new.
    /// Informational only: the merge semantics are unchanged.
    Conflict {
        label: String,
        conflict: PushConflict,
    },
    /// A cycle step failed.
    Error { label: String, message: String },
    /// The coordinator's state changed.
    State { state: SyncState },
    /// A realtime change arrived from the remote.
    RemoteChanged {
        label: String,
        kind: RemoteEventKind,
        row: Value,
    },
}
