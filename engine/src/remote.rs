//! The remote data gateway seam.
//!
//! Queries are expressed as column filters over JSON-shaped rows. The only
//! place the gateway's own query language leaks into the engine is
//! [`render_json_path`], which turns a dotted unique-key path into the
//! gateway's JSON-column syntax.

use crate::error::Result;
use crate::TableName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// A column filter on a remote query.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteFilter {
    /// Column equals value.
    Eq { column: String, value: Value },
    /// Column is greater than or equal to value.
    Gte { column: String, value: Value },
}

impl RemoteFilter {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::Eq {
            column: column.into(),
            value,
        }
    }

    pub fn gte(column: impl Into<String>, value: Value) -> Self {
        Self::Gte {
            column: column.into(),
            value,
        }
    }
}

/// Kind of a realtime change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEventKind {
    Insert,
    Update,
    Delete,
}

/// One realtime change delivered over a subscription.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    /// Remote table the change happened on.
    pub table: TableName,
    pub kind: RemoteEventKind,
    /// The affected row, as the gateway reports it.
    pub row: Value,
}

/// Handle identifying an open realtime subscription.
pub type SubscriptionId = String;

/// The remote relational source, as consumed by the engine.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Filtered select over the row range `[from, to]` (inclusive).
    async fn select_page(
        &self,
        table: &str,
        filters: &[RemoteFilter],
        from: usize,
        to: usize,
    ) -> Result<Vec<Value>>;

    /// Single-row select by primary key.
    async fn select_by_pk(&self, table: &str, pk_column: &str, pk: &str) -> Result<Option<Value>>;

    /// Select the sole row matching all filters. Implementations report an
    /// error when more than one row matches.
    async fn select_one(&self, table: &str, filters: &[RemoteFilter]) -> Result<Option<Value>>;

    /// Update by primary key, returning the affected rows (possibly empty).
    async fn update_by_pk(
        &self,
        table: &str,
        pk_column: &str,
        pk: &str,
        payload: Map<String, Value>,
    ) -> Result<Vec<Value>>;

    /// Insert a row, returning it with its assigned primary key.
    async fn insert(&self, table: &str, payload: Map<String, Value>) -> Result<Value>;

    /// Open a realtime subscription on a table, optionally filtered.
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<RemoteFilter>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<RemoteEvent>)>;

    /// Tear down a subscription.
    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()>;
}

/// Render a dotted path in the gateway's JSON-column syntax: `a.b` becomes
/// `a->>b`, deeper paths chain with `->` (`a.b.c` becomes `a->b->>c`).
/// Flat names pass through unchanged.
pub fn render_json_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    match segments.split_last() {
        Some((last, init)) if !init.is_empty() => format!("{}->>{}", init.join("->"), last),
        _ => path.to_string(),
    }
}
