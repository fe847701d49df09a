//! Push: reconcile the local delta to the remote table.
//!
//! Deletes run before upserts: reversed, a row re-created under the same
//! unique key would collide with its not-yet-tombstoned predecessor and
//! leave a remote duplicate.

use crate::context::SyncContext;
use crate::engine::TableEngine;
use crate::error::{Error, Result};
use crate::fields::{extract_path, iso_from_ms, read_field, read_value_field, timestamp_ms, value_to_id};
use crate::local::TableDeltas;
use crate::remote::{render_json_path, RemoteFilter};
use crate::{RecordId, RemoteId, TimestampMs};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A push skipped by last-write-wins: the remote copy was at least as new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConflict {
    pub record_id: RecordId,
    pub remote_id: RemoteId,
    pub local_updated_at: TimestampMs,
    pub remote_updated_at: TimestampMs,
}

/// Result of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    /// Local ids whose remote rows were soft-deleted.
    pub soft_deleted: Vec<RecordId>,
    /// Local ids written to the remote (update or insert).
    pub upserted: Vec<RecordId>,
    /// Skips where the remote side won.
    pub conflicts: Vec<PushConflict>,
}

impl PushOutcome {
    pub fn is_empty(&self) -> bool {
        self.soft_deleted.is_empty() && self.upserted.is_empty() && self.conflicts.is_empty()
    }
}

impl TableEngine {
    /// Push the local delta for this table.
    ///
    /// Phase A soft-deletes, Phase B upserts, in that order. Remote rows
    /// are never physically removed.
    pub async fn push(&self, deltas: &TableDeltas, ctx: &SyncContext) -> Result<PushOutcome> {
        let ctx = self.resolve_ctx(ctx);
        let descriptor = &*self.descriptor;
        let mut outcome = PushOutcome::default();

        // Phase A: deletes.
        for id in &deltas.deleted {
            let Some(record) = self.store.find_by_id(&descriptor.local_table, id).await? else {
                continue;
            };
            let Some(remote_id) = descriptor.record_remote_id(&record) else {
                // Never reached the remote; nothing to tombstone.
                continue;
            };
            let mut payload = Map::new();
            payload.insert(descriptor.soft_delete_field.clone(), Value::Bool(true));
            payload.insert(
                descriptor.timestamps.remote_field.clone(),
                Value::String(iso_from_ms(self.time.now_ms())),
            );
            self.gateway
                .update_by_pk(
                    &descriptor.remote_table,
                    &descriptor.keys.remote_pk,
                    &remote_id,
                    payload,
                )
                .await?;
            tracing::debug!(table = %descriptor.label, %remote_id, "soft-deleted remote row");
            outcome.soft_deleted.push(id.clone());
        }

        // Phase B: upserts.
        let mut seen: HashSet<&RecordId> = HashSet::new();
        for id in deltas.created.iter().chain(deltas.updated.iter()) {
            if !seen.insert(id) {
                continue;
            }
            let Some(record) = self.store.find_by_id(&descriptor.local_table, id).await? else {
                // Deleted out from under us between patch application and
                // push; picked up as a tombstone next cycle.
                continue;
            };
            if !descriptor.wants_push(&record, &ctx) {
                continue;
            }

            let mut payload = descriptor.map_local_to_remote(&record, &ctx);
            if let Some(scope) = &descriptor.scope {
                if read_field(&payload, &scope.user_field).is_none() {
                    if let Some(user_id) = &ctx.user_id {
                        payload.insert(scope.user_field.clone(), Value::String(user_id.clone()));
                    }
                }
            }

            let current_remote_id = descriptor.record_remote_id(&record);
            let local_ts = record.timestamp(&descriptor.timestamps.local_field);

            let mut target = current_remote_id.clone();
            if target.is_none() && !descriptor.keys.unique_keys.is_empty() {
                target = self.resolve_target_by_unique_key(&record).await?;
            }

            // Last-write-wins check against the live remote row. A vanished
            // target (hard-deleted externally) falls through to insert.
            let mut update_target = None;
            if let Some(remote_id) = target {
                if let Some(existing) = self
                    .gateway
                    .select_by_pk(&descriptor.remote_table, &descriptor.keys.remote_pk, &remote_id)
                    .await?
                {
                    let remote_ts =
                        timestamp_ms(read_value_field(&existing, &descriptor.timestamps.remote_field));
                    if remote_ts >= local_ts {
                        tracing::debug!(
                            table = %descriptor.label,
                            record = %id,
                            %remote_id,
                            local_ts,
                            remote_ts,
                            "push skipped: remote copy is at least as new"
                        );
                        outcome.conflicts.push(PushConflict {
                            record_id: id.clone(),
                            remote_id,
                            local_updated_at: local_ts,
                            remote_updated_at: remote_ts,
                        });
                        continue;
                    }
                    update_target = Some(remote_id);
                }
            }

            let (new_remote_id, response_row) = match update_target {
                Some(remote_id) => {
                    let rows = self
                        .gateway
                        .update_by_pk(
                            &descriptor.remote_table,
                            &descriptor.keys.remote_pk,
                            &remote_id,
                            payload,
                        )
                        .await?;
                    (remote_id, rows.into_iter().next())
                }
                None => {
                    let inserted = self.gateway.insert(&descriptor.remote_table, payload).await?;
                    let remote_id = read_value_field(&inserted, &descriptor.keys.remote_pk)
                        .and_then(value_to_id)
                        .ok_or_else(|| Error::Gateway {
                            table: descriptor.local_table.clone(),
                            message: "insert response carries no primary key".into(),
                        })?;
                    (remote_id, Some(inserted))
                }
            };

            // Write back the remote identity under suppression, but only
            // when something actually moved; unconditional write-back would
            // dirty the row again and provoke another cycle.
            let response_ts = response_row
                .as_ref()
                .map(|row| timestamp_ms(read_value_field(row, &descriptor.timestamps.remote_field)))
                .unwrap_or(0);
            let id_changed = current_remote_id.as_deref() != Some(new_remote_id.as_str());
            if id_changed || response_ts > local_ts {
                let mut write_back = Map::new();
                write_back.insert(
                    descriptor.keys.local_remote_id_field.clone(),
                    Value::String(new_remote_id.clone()),
                );
                write_back.insert(
                    descriptor.timestamps.local_field.clone(),
                    Value::from(if response_ts > 0 { response_ts } else { local_ts }),
                );
                self.accessor
                    .write_suppressed(&descriptor.local_table, id, write_back)
                    .await?;
            }
            outcome.upserted.push(id.clone());
        }

        Ok(outcome)
    }

    /// Find the live remote row matching all unique keys and return its
    /// primary key.
    async fn resolve_target_by_unique_key(
        &self,
        record: &crate::local::LocalRecord,
    ) -> Result<Option<RemoteId>> {
        let descriptor = &*self.descriptor;
        let mut filters = Vec::with_capacity(descriptor.keys.unique_keys.len() + 1);
        for key in &descriptor.keys.unique_keys {
            let value = extract_path(&record.fields, &key.local_path).ok_or_else(|| {
                Error::MissingKeyPath {
                    table: descriptor.local_table.clone(),
                    record: record.id.clone(),
                    path: key.local_path.clone(),
                }
            })?;
            filters.push(RemoteFilter::eq(render_json_path(&key.remote_path), value));
        }
        filters.push(RemoteFilter::eq(
            descriptor.soft_delete_field.clone(),
            Value::Bool(false),
        ));

        let row = self
            .gateway
            .select_one(&descriptor.remote_table, &filters)
            .await?;
        Ok(row
            .as_ref()
            .and_then(|row| read_value_field(row, &descriptor.keys.remote_pk))
            .and_then(value_to_id))
    }
}
