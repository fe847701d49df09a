//! The local reactive database seam.
//!
//! The engine never talks to a concrete database; it consumes this narrow
//! interface. The contract that matters most: every atomic write emits
//! exactly one change notice, because the reentrancy guard pairs suppressed
//! writes 1:1 with the notifications they produce.

use crate::error::Result;
use crate::fields::{read_field, soft_deleted, timestamp_ms};
use crate::{RecordId, TableName, TimestampMs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// A row in the local database.
///
/// Opaque to the engine except for the stable `id` and the descriptor's
/// configured fields, all read with name-style tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// Stable local identifier.
    pub id: RecordId,
    /// The record's fields.
    pub fields: Map<String, Value>,
}

impl LocalRecord {
    pub fn new(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON object literal. Non-objects yield a
    /// record with no fields.
    pub fn from_value(id: impl Into<RecordId>, value: Value) -> Self {
        Self::new(id, value.as_object().cloned().unwrap_or_default())
    }

    /// Read a field with name-style fallback.
    pub fn field(&self, name: &str) -> Option<&Value> {
        read_field(&self.fields, name)
    }

    /// The record's timestamp in milliseconds, coerced; 0 when absent.
    pub fn timestamp(&self, field: &str) -> TimestampMs {
        timestamp_ms(self.field(field))
    }

    /// Soft-delete flag: true iff the field is boolean `true`.
    pub fn is_soft_deleted(&self, field: &str) -> bool {
        soft_deleted(&self.fields, field)
    }
}

/// A patch produced by Pull, ready for atomic application to one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePatch {
    /// Records to create.
    pub created: Vec<LocalRecord>,
    /// Records to update, addressed by their local id.
    pub updated: Vec<LocalRecord>,
    /// Local ids to delete.
    pub deleted: Vec<RecordId>,
}

impl TablePatch {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// The local database's own unsynced mutations for one table, as reported
/// by [`LocalStore::apply_sync_patch`]. This is what Push pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDeltas {
    pub created: Vec<RecordId>,
    pub updated: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
}

impl TableDeltas {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// One change notification, emitted per atomic write batch.
///
/// `tables` lists every table in the write's scope, not only the mutated
/// ones; consumers filter on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub tables: Vec<TableName>,
}

/// The local reactive database, as consumed by the engine.
///
/// Implementations must emit exactly one [`ChangeNotice`] per atomic write
/// — including [`LocalStore::apply_sync_patch`], which always counts as one
/// atomic write even when the patch is empty (it still records the
/// checkpoint).
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Fetch a record by id. Rows pending deletion (tombstones) are still
    /// returned so Push can read their remote id.
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<LocalRecord>>;

    /// Fetch the sole record whose field equals `value`, tombstones
    /// included. Returns `None` when no record matches.
    async fn find_by_field(&self, table: &str, field: &str, value: &Value)
        -> Result<Option<LocalRecord>>;

    /// All live rows of a table, optionally restricted to rows whose scope
    /// field equals the given value. Tombstones are excluded.
    async fn query_scoped(
        &self,
        table: &str,
        scope: Option<(&str, &Value)>,
    ) -> Result<Vec<LocalRecord>>;

    /// Merge `fields` into an existing record as one atomic write.
    async fn update_record(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Apply a pull patch and record the new checkpoint, all inside a
    /// single atomic write, then report the *local* mutations accumulated
    /// since the previous call. Patch application itself is never reported.
    async fn apply_sync_patch(
        &self,
        patch: HashMap<TableName, TablePatch>,
        checkpoint: TimestampMs,
    ) -> Result<HashMap<TableName, TableDeltas>>;

    /// The checkpoint recorded by the last [`LocalStore::apply_sync_patch`]
    /// call, or `None` before the first sync.
    async fn last_pulled_at(&self) -> Result<Option<TimestampMs>>;

    /// Subscribe to change notices, one per atomic write.
    fn observe_changes(&self) -> broadcast::Receiver<ChangeNotice>;
}
