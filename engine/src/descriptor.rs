//! Sync descriptors: the static, per-table configuration of the engine.
//!
//! One descriptor ties a local table to a remote table and names the fields
//! the engine is allowed to interpret: primary keys, timestamps, the
//! soft-delete flag, optional per-user scope and optional unique keys used
//! to re-match rows whose remote identity is not yet known.

use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::fields::{iso_from_ms, read_field, timestamp_ms};
use crate::local::LocalRecord;
use crate::TableName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Default remote primary key column.
pub const DEFAULT_REMOTE_PK: &str = "id";
/// Default local field holding the remote primary key.
pub const DEFAULT_REMOTE_ID_FIELD: &str = "remote_id";
/// Default timestamp field on both sides.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "updated_at";
/// Default soft-delete flag on both sides.
pub const DEFAULT_SOFT_DELETE_FIELD: &str = "is_deleted";

/// Maps a remote row to local record fields.
pub type RemoteToLocal = Arc<dyn Fn(&Value, &SyncContext) -> Map<String, Value> + Send + Sync>;
/// Maps a local record to a remote payload.
pub type LocalToRemote = Arc<dyn Fn(&LocalRecord, &SyncContext) -> Map<String, Value> + Send + Sync>;
/// Per-record push filter.
pub type PushFilter = Arc<dyn Fn(&LocalRecord, &SyncContext) -> bool + Send + Sync>;

/// A pair of paths identifying the same logical key on both sides.
///
/// Each path is either a flat field name or a dotted path into a JSON
/// column (`"meta.slug"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueKeySpec {
    pub local_path: String,
    pub remote_path: String,
}

impl UniqueKeySpec {
    pub fn new(local_path: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        }
    }
}

/// Key configuration for a synced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    /// Remote primary key column.
    pub remote_pk: String,
    /// Local field storing the remote primary key.
    pub local_remote_id_field: String,
    /// Unique keys used to bootstrap the remote id when it is unknown.
    pub unique_keys: Vec<UniqueKeySpec>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            remote_pk: DEFAULT_REMOTE_PK.into(),
            local_remote_id_field: DEFAULT_REMOTE_ID_FIELD.into(),
            unique_keys: Vec::new(),
        }
    }
}

/// Timestamp field names. Local values are integer milliseconds, remote
/// values are ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampConfig {
    pub local_field: String,
    pub remote_field: String,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            local_field: DEFAULT_TIMESTAMP_FIELD.into(),
            remote_field: DEFAULT_TIMESTAMP_FIELD.into(),
        }
    }
}

/// Optional per-user scope restricting queries and change streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeConfig {
    pub user_field: String,
}

/// Static configuration for one synced table.
///
/// Descriptors are registered once at coordinator construction and never
/// mutated afterwards.
#[derive(Clone)]
pub struct SyncDescriptor {
    pub local_table: TableName,
    pub remote_table: TableName,
    pub keys: KeyConfig,
    pub timestamps: TimestampConfig,
    pub scope: Option<ScopeConfig>,
    pub soft_delete_field: String,
    /// Human-readable diagnostic name; defaults to the local table.
    pub label: String,
    remote_to_local: Option<RemoteToLocal>,
    local_to_remote: Option<LocalToRemote>,
    should_sync_local: Option<PushFilter>,
}

impl SyncDescriptor {
    /// Create a descriptor with default key, timestamp and soft-delete
    /// field names.
    pub fn new(local_table: impl Into<TableName>, remote_table: impl Into<TableName>) -> Self {
        let local_table = local_table.into();
        Self {
            label: local_table.clone(),
            local_table,
            remote_table: remote_table.into(),
            keys: KeyConfig::default(),
            timestamps: TimestampConfig::default(),
            scope: None,
            soft_delete_field: DEFAULT_SOFT_DELETE_FIELD.into(),
            remote_to_local: None,
            local_to_remote: None,
            should_sync_local: None,
        }
    }

    pub fn with_remote_pk(mut self, column: impl Into<String>) -> Self {
        self.keys.remote_pk = column.into();
        self
    }

    pub fn with_remote_id_field(mut self, field: impl Into<String>) -> Self {
        self.keys.local_remote_id_field = field.into();
        self
    }

    /// Add a unique key. May be called multiple times for composite keys.
    pub fn with_unique_key(
        mut self,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        self.keys
            .unique_keys
            .push(UniqueKeySpec::new(local_path, remote_path));
        self
    }

    pub fn with_timestamps(
        mut self,
        local_field: impl Into<String>,
        remote_field: impl Into<String>,
    ) -> Self {
        self.timestamps = TimestampConfig {
            local_field: local_field.into(),
            remote_field: remote_field.into(),
        };
        self
    }

    /// Restrict all queries and change streams to rows whose `user_field`
    /// equals the context's user id.
    pub fn with_scope(mut self, user_field: impl Into<String>) -> Self {
        self.scope = Some(ScopeConfig {
            user_field: user_field.into(),
        });
        self
    }

    pub fn with_soft_delete_field(mut self, field: impl Into<String>) -> Self {
        self.soft_delete_field = field.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_remote_to_local(
        mut self,
        map: impl Fn(&Value, &SyncContext) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.remote_to_local = Some(Arc::new(map));
        self
    }

    pub fn with_local_to_remote(
        mut self,
        map: impl Fn(&LocalRecord, &SyncContext) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.local_to_remote = Some(Arc::new(map));
        self
    }

    /// Only records for which `filter` returns true are pushed.
    pub fn with_push_filter(
        mut self,
        filter: impl Fn(&LocalRecord, &SyncContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_sync_local = Some(Arc::new(filter));
        self
    }

    /// Check that every required identifier is present and non-empty.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("local_table", &self.local_table),
            ("remote_table", &self.remote_table),
            ("keys.remote_pk", &self.keys.remote_pk),
            (
                "keys.local_remote_id_field",
                &self.keys.local_remote_id_field,
            ),
            ("timestamps.local_field", &self.timestamps.local_field),
            ("timestamps.remote_field", &self.timestamps.remote_field),
            ("soft_delete_field", &self.soft_delete_field),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(Error::MissingDescriptorField {
                    table: self.local_table.clone(),
                    field: name.into(),
                });
            }
        }
        for key in &self.keys.unique_keys {
            if key.local_path.is_empty() || key.remote_path.is_empty() {
                return Err(Error::MissingDescriptorField {
                    table: self.local_table.clone(),
                    field: "keys.unique_keys".into(),
                });
            }
        }
        if let Some(scope) = &self.scope {
            if scope.user_field.is_empty() {
                return Err(Error::MissingDescriptorField {
                    table: self.local_table.clone(),
                    field: "scope.user_field".into(),
                });
            }
        }
        Ok(())
    }

    /// Map a remote row to local record fields.
    ///
    /// Without a custom mapping: copies the row's fields minus the primary
    /// key, converting the remote timestamp to local milliseconds under the
    /// local field name.
    pub fn map_remote_to_local(&self, row: &Value, ctx: &SyncContext) -> Map<String, Value> {
        if let Some(map) = &self.remote_to_local {
            return map(row, ctx);
        }
        let mut fields = Map::new();
        let Some(source) = row.as_object() else {
            return fields;
        };
        for (name, value) in source {
            if *name == self.keys.remote_pk {
                continue;
            }
            if *name == self.timestamps.remote_field {
                fields.insert(
                    self.timestamps.local_field.clone(),
                    Value::from(timestamp_ms(Some(value))),
                );
            } else {
                fields.insert(name.clone(), value.clone());
            }
        }
        fields
    }

    /// Map a local record to a remote payload.
    ///
    /// Without a custom mapping: copies the record's fields minus the local
    /// remote-id field, converting the local timestamp to an ISO-8601
    /// string under the remote field name.
    pub fn map_local_to_remote(&self, record: &LocalRecord, ctx: &SyncContext) -> Map<String, Value> {
        if let Some(map) = &self.local_to_remote {
            return map(record, ctx);
        }
        let mut payload = Map::new();
        for (name, value) in &record.fields {
            if *name == self.keys.local_remote_id_field {
                continue;
            }
            if *name == self.timestamps.local_field {
                payload.insert(
                    self.timestamps.remote_field.clone(),
                    Value::String(iso_from_ms(timestamp_ms(Some(value)))),
                );
            } else {
                payload.insert(name.clone(), value.clone());
            }
        }
        payload
    }

    /// Whether the record passes the push filter (true when none is set).
    pub fn wants_push(&self, record: &LocalRecord, ctx: &SyncContext) -> bool {
        match &self.should_sync_local {
            Some(filter) => filter(record, ctx),
            None => true,
        }
    }

    /// The scope filter as a `(field, value)` pair, when both the scope and
    /// the context user are set.
    pub fn scope_filter(&self, ctx: &SyncContext) -> Option<(&str, Value)> {
        match (&self.scope, &ctx.user_id) {
            (Some(scope), Some(user_id)) => {
                Some((scope.user_field.as_str(), Value::String(user_id.clone())))
            }
            _ => None,
        }
    }

    /// Read the remote id stored on a local record, treating an empty
    /// string as absent.
    pub fn record_remote_id(&self, record: &LocalRecord) -> Option<String> {
        match read_field(&record.fields, &self.keys.local_remote_id_field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for SyncDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncDescriptor")
            .field("local_table", &self.local_table)
            .field("remote_table", &self.remote_table)
            .field("keys", &self.keys)
            .field("timestamps", &self.timestamps)
            .field("scope", &self.scope)
            .field("soft_delete_field", &self.soft_delete_field)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
