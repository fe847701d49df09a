//! Pull: fetch the remote delta and turn it into a local patch.
//!
//! The remote query is filtered with `>=` on the timestamp (clock
//! granularity makes exclusive filtering lose same-millisecond writes) while
//! the merge uses a strict `>` (reapplying an equal row would churn and
//! re-trigger a cycle). The asymmetry is deliberate; pull is idempotent, so
//! redelivered rows are harmless.

use crate::context::SyncContext;
use crate::engine::TableEngine;
use crate::error::{Error, Result};
use crate::fields::{
    extract_value_path, iso_from_ms, read_field, soft_deleted, timestamp_ms, unique_key_string,
    value_to_id,
};
use crate::local::{LocalRecord, TablePatch};
use crate::remote::RemoteFilter;
use crate::TimestampMs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Rows fetched per page.
pub const PULL_PAGE_SIZE: usize = 1000;

/// Result of one pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullOutcome {
    /// Patch ready for atomic application to the local table.
    pub patch: TablePatch,
    /// Highest remote timestamp seen, informational only: checkpoint
    /// advancement uses the instant captured before paging started.
    pub max_remote_updated_at: Option<TimestampMs>,
}

impl TableEngine {
    /// Pull the remote delta since `last_pulled_at` (`None` on first sync).
    ///
    /// The returned patch is applied by the caller inside the suppression
    /// scope; pull itself never writes.
    pub async fn pull(
        &self,
        last_pulled_at: Option<TimestampMs>,
        ctx: &SyncContext,
    ) -> Result<PullOutcome> {
        let ctx = self.resolve_ctx(ctx);
        let descriptor = &*self.descriptor;

        let mut filters = Vec::new();
        if let Some((field, value)) = descriptor.scope_filter(&ctx) {
            filters.push(RemoteFilter::eq(field, value));
        }
        if let Some(since) = last_pulled_at {
            filters.push(RemoteFilter::gte(
                descriptor.timestamps.remote_field.clone(),
                Value::String(iso_from_ms(since)),
            ));
        }

        let mut rows = Vec::new();
        let mut from = 0usize;
        loop {
            let page = self
                .gateway
                .select_page(
                    &descriptor.remote_table,
                    &filters,
                    from,
                    from + PULL_PAGE_SIZE - 1,
                )
                .await?;
            let page_len = page.len();
            rows.extend(page);
            if page_len < PULL_PAGE_SIZE {
                break;
            }
            from += PULL_PAGE_SIZE;
        }
        tracing::debug!(
            table = %descriptor.label,
            rows = rows.len(),
            since = ?last_pulled_at,
            "pulled remote rows"
        );

        let mut outcome = PullOutcome::default();
        // Built lazily, at most once per pull.
        let mut unique_index: Option<HashMap<String, LocalRecord>> = None;
        let mut seen_remote_keys: HashSet<String> = HashSet::new();

        for row in &rows {
            let Some(row_fields) = row.as_object() else {
                tracing::warn!(table = %descriptor.label, "skipping non-object remote row");
                continue;
            };
            let Some(remote_id) =
                read_field(row_fields, &descriptor.keys.remote_pk).and_then(value_to_id)
            else {
                tracing::warn!(table = %descriptor.label, "skipping remote row without a usable primary key");
                continue;
            };
            let remote_ts = timestamp_ms(read_field(row_fields, &descriptor.timestamps.remote_field));
            if remote_ts > 0 {
                outcome.max_remote_updated_at = Some(
                    outcome
                        .max_remote_updated_at
                        .map_or(remote_ts, |seen| seen.max(remote_ts)),
                );
            }
            let is_deleted = soft_deleted(row_fields, &descriptor.soft_delete_field);

            let mut matched = self.accessor.find_by_remote_id(descriptor, &remote_id).await?;
            if matched.is_none() && !descriptor.keys.unique_keys.is_empty() {
                if unique_index.is_none() {
                    unique_index = Some(self.accessor.build_unique_index(descriptor, &ctx).await?);
                }
                let values: Vec<Value> = descriptor
                    .keys
                    .unique_keys
                    .iter()
                    .map(|key| extract_value_path(row, &key.remote_path).unwrap_or(Value::Null))
                    .collect();
                let key = unique_key_string(&values);
                if !seen_remote_keys.insert(key.clone()) {
                    return Err(Error::DuplicateRemoteKey {
                        table: descriptor.local_table.clone(),
                        key,
                    });
                }
                matched = unique_index
                    .as_ref()
                    .and_then(|index| index.get(&key))
                    .cloned();
            }

            if is_deleted {
                if let Some(local) = matched {
                    outcome.patch.deleted.push(local.id);
                }
                continue;
            }

            let mut fields = descriptor.map_remote_to_local(row, &ctx);
            if read_field(&fields, &descriptor.keys.local_remote_id_field).is_none() {
                fields.insert(
                    descriptor.keys.local_remote_id_field.clone(),
                    Value::String(remote_id.clone()),
                );
            }
            if read_field(&fields, &descriptor.timestamps.local_field).is_none() {
                fields.insert(
                    descriptor.timestamps.local_field.clone(),
                    Value::from(remote_ts),
                );
            }

            match matched {
                Some(local) => {
                    let local_ts = local.timestamp(&descriptor.timestamps.local_field);
                    if remote_ts > local_ts {
                        outcome
                            .patch
                            .updated
                            .push(LocalRecord::new(local.id, fields));
                    }
                    // Equal means the remote has merely caught up to us;
                    // reapplying would churn.
                }
                None => {
                    let id = format!("{}:{}", descriptor.local_table, remote_id);
                    outcome.patch.created.push(LocalRecord::new(id, fields));
                }
            }
        }

        Ok(outcome)
    }
}
