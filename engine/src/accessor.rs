//! Local data accessor: descriptor-aware reads and suppressed writes
//! against the local store.

use crate::context::SyncContext;
use crate::descriptor::SyncDescriptor;
use crate::error::{Error, Result};
use crate::fields::{extract_path, unique_key_string};
use crate::guard::ReentrancyGuard;
use crate::local::{LocalRecord, LocalStore};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Descriptor-aware access to the local store.
pub struct LocalAccessor {
    store: Arc<dyn LocalStore>,
    guard: Arc<ReentrancyGuard>,
}

impl LocalAccessor {
    pub fn new(store: Arc<dyn LocalStore>, guard: Arc<ReentrancyGuard>) -> Self {
        Self { store, guard }
    }

    /// The sole record whose remote-id field equals `remote_id`, or `None`.
    pub async fn find_by_remote_id(
        &self,
        descriptor: &SyncDescriptor,
        remote_id: &str,
    ) -> Result<Option<LocalRecord>> {
        self.store
            .find_by_field(
                &descriptor.local_table,
                &descriptor.keys.local_remote_id_field,
                &Value::String(remote_id.to_owned()),
            )
            .await
    }

    /// Build the unique-key index over live rows.
    ///
    /// Rows are scope-filtered when the descriptor and context both carry a
    /// user; soft-deleted rows are skipped. A missing key path or a
    /// duplicate key is an error, never a silent merge.
    pub async fn build_unique_index(
        &self,
        descriptor: &SyncDescriptor,
        ctx: &SyncContext,
    ) -> Result<HashMap<String, LocalRecord>> {
        let scope = descriptor.scope_filter(ctx);
        let rows = self
            .store
            .query_scoped(
                &descriptor.local_table,
                scope.as_ref().map(|(field, value)| (*field, value)),
            )
            .await?;

        let mut index = HashMap::with_capacity(rows.len());
        for record in rows {
            if record.is_soft_deleted(&descriptor.soft_delete_field) {
                continue;
            }
            let mut values = Vec::with_capacity(descriptor.keys.unique_keys.len());
            for key in &descriptor.keys.unique_keys {
                let value = extract_path(&record.fields, &key.local_path).ok_or_else(|| {
                    Error::MissingKeyPath {
                        table: descriptor.local_table.clone(),
                        record: record.id.clone(),
                        path: key.local_path.clone(),
                    }
                })?;
                values.push(value);
            }
            let key = unique_key_string(&values);
            if index.insert(key.clone(), record).is_some() {
                return Err(Error::DuplicateLocalKey {
                    table: descriptor.local_table.clone(),
                    key,
                });
            }
        }
        Ok(index)
    }

    /// Route a write through the reentrancy guard so the resulting change
    /// notification is swallowed instead of re-triggering a sync.
    pub async fn write_suppressed(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.guard
            .run_suppressed(self.store.update_record(table, id, fields))
            .await
    }
}
