//! In-memory implementations of both trait seams.
//!
//! These back the test suites and double as reference semantics for real
//! adapters: what counts as an atomic write, when change notices fire, how
//! dirty state is classified and when tombstones may be dropped.
//!
//! Both types share state across clones, so a test can hold one handle
//! while the engine holds another.

use crate::error::{Error, Result};
use crate::fields::{read_field, read_value_field, timestamp_ms, value_to_id};
use crate::local::{ChangeNotice, LocalRecord, LocalStore, TableDeltas, TablePatch};
use crate::remote::{RemoteEvent, RemoteEventKind, RemoteFilter, RemoteGateway, SubscriptionId};
use crate::{RecordId, TableName, TimestampMs};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Unsynced local mutations for one table, classified by how the row first
/// became dirty.
#[derive(Debug, Default)]
struct DirtyLog {
    created: Vec<RecordId>,
    updated: Vec<RecordId>,
    deleted: Vec<RecordId>,
}

impl DirtyLog {
    fn record_created(&mut self, id: &str) {
        if !self.created.iter().any(|d| d == id) {
            self.created.push(id.to_owned());
        }
    }

    fn record_updated(&mut self, id: &str) {
        if self.created.iter().any(|d| d == id) {
            return;
        }
        if !self.updated.iter().any(|d| d == id) {
            self.updated.push(id.to_owned());
        }
    }

    /// Returns true when the row was locally created and never synced, in
    /// which case the caller drops it outright instead of tombstoning.
    fn record_deleted(&mut self, id: &str) -> bool {
        if self.created.iter().any(|d| d == id) {
            self.created.retain(|d| d != id);
            return true;
        }
        self.updated.retain(|d| d != id);
        if !self.deleted.iter().any(|d| d == id) {
            self.deleted.push(id.to_owned());
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    fn take(&mut self) -> TableDeltas {
        TableDeltas {
            created: std::mem::take(&mut self.created),
            updated: std::mem::take(&mut self.updated),
            deleted: std::mem::take(&mut self.deleted),
        }
    }
}

#[derive(Debug, Default)]
struct TableState {
    rows: HashMap<RecordId, LocalRecord>,
    /// Locally deleted rows kept around until their deletion has been
    /// reported and pushed, so Push can still read their remote id.
    tombstones: HashSet<RecordId>,
    /// Deletions handed out in the previous deltas; physically dropped at
    /// the next checkpoint.
    reported_deleted: HashSet<RecordId>,
    dirty: DirtyLog,
}

impl TableState {
    fn is_live(&self, id: &str) -> bool {
        self.rows.contains_key(id) && !self.tombstones.contains(id)
    }
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<TableName, TableState>,
    last_pulled_at: Option<TimestampMs>,
}

/// In-memory [`LocalStore`].
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    changes: broadcast::Sender<ChangeNotice>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            changes,
        }
    }

    fn notify(&self, tables: Vec<TableName>) {
        let _ = self.changes.send(ChangeNotice { tables });
    }

    /// Create a record as the user would: marks it dirty and emits one
    /// change notice.
    pub fn insert(&self, table: &str, record: LocalRecord) {
        {
            let mut state = self.state.lock();
            let table_state = state.tables.entry(table.to_owned()).or_default();
            table_state.dirty.record_created(&record.id);
            table_state.tombstones.remove(&record.id);
            table_state.rows.insert(record.id.clone(), record);
        }
        self.notify(vec![table.to_owned()]);
    }

    /// Merge fields into a record as the user would. Returns false when the
    /// record does not exist (no notice is emitted then).
    pub fn update(&self, table: &str, id: &str, fields: Map<String, Value>) -> bool {
        let found = {
            let mut state = self.state.lock();
            let table_state = state.tables.entry(table.to_owned()).or_default();
            match table_state.rows.get_mut(id) {
                Some(record) => {
                    for (name, value) in fields {
                        record.fields.insert(name, value);
                    }
                    table_state.dirty.record_updated(id);
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(vec![table.to_owned()]);
        }
        found
    }

    /// Delete a record as the user would. Synced rows become tombstones
    /// awaiting push; never-synced rows are dropped outright.
    pub fn delete(&self, table: &str, id: &str) {
        {
            let mut state = self.state.lock();
            let table_state = state.tables.entry(table.to_owned()).or_default();
            if !table_state.rows.contains_key(id) {
                return;
            }
            if table_state.dirty.record_deleted(id) {
                table_state.rows.remove(id);
            } else {
                table_state.tombstones.insert(id.to_owned());
            }
        }
        self.notify(vec![table.to_owned()]);
    }

    /// A live record by id.
    pub fn get(&self, table: &str, id: &str) -> Option<LocalRecord> {
        let state = self.state.lock();
        let table_state = state.tables.get(table)?;
        if !table_state.is_live(id) {
            return None;
        }
        table_state.rows.get(id).cloned()
    }

    /// All live records of a table.
    pub fn live_rows(&self, table: &str) -> Vec<LocalRecord> {
        let state = self.state.lock();
        state
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|r| !t.tombstones.contains(&r.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a record is deleted locally but not yet pushed.
    pub fn is_tombstoned(&self, table: &str, id: &str) -> bool {
        let state = self.state.lock();
        state
            .tables
            .get(table)
            .map(|t| t.tombstones.contains(id))
            .unwrap_or(false)
    }

    /// The checkpoint recorded by the last patch application.
    pub fn checkpoint(&self) -> Option<TimestampMs> {
        self.state.lock().last_pulled_at
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<LocalRecord>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.rows.get(id))
            .cloned())
    }

    async fn find_by_field(
        &self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<LocalRecord>> {
        let state = self.state.lock();
        Ok(state.tables.get(table).and_then(|t| {
            t.rows
                .values()
                .find(|record| read_field(&record.fields, field) == Some(value))
                .cloned()
        }))
    }

    async fn query_scoped(
        &self,
        table: &str,
        scope: Option<(&str, &Value)>,
    ) -> Result<Vec<LocalRecord>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|record| !t.tombstones.contains(&record.id))
                    .filter(|record| match scope {
                        Some((field, value)) => read_field(&record.fields, field) == Some(value),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_record(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let updated = {
            let mut state = self.state.lock();
            let table_state = state.tables.entry(table.to_owned()).or_default();
            match table_state.rows.get_mut(id) {
                Some(record) => {
                    for (name, value) in fields {
                        record.fields.insert(name, value);
                    }
                    table_state.dirty.record_updated(id);
                    true
                }
                None => false,
            }
        };
        if !updated {
            return Err(Error::RecordNotFound(id.to_owned()));
        }
        self.notify(vec![table.to_owned()]);
        Ok(())
    }

    async fn apply_sync_patch(
        &self,
        patch: HashMap<TableName, TablePatch>,
        checkpoint: TimestampMs,
    ) -> Result<HashMap<TableName, TableDeltas>> {
        let notice_tables: Vec<TableName> = patch.keys().cloned().collect();
        let deltas = {
            let mut state = self.state.lock();

            // Deletions reported at the previous checkpoint have been
            // pushed by now; drop their tombstones for good.
            for table_state in state.tables.values_mut() {
                for id in table_state.reported_deleted.drain().collect::<Vec<_>>() {
                    table_state.rows.remove(&id);
                    table_state.tombstones.remove(&id);
                }
            }

            // Snapshot local mutations before the patch lands; patch
            // application itself is never reported back.
            let mut deltas = HashMap::new();
            for (name, table_state) in state.tables.iter_mut() {
                if table_state.dirty.is_empty() {
                    continue;
                }
                let taken = table_state.dirty.take();
                for id in &taken.deleted {
                    table_state.reported_deleted.insert(id.clone());
                }
                deltas.insert(name.clone(), taken);
            }

            for (name, table_patch) in patch {
                let table_state = state.tables.entry(name).or_default();
                for record in table_patch.created {
                    table_state.tombstones.remove(&record.id);
                    table_state.rows.insert(record.id.clone(), record);
                }
                for record in table_patch.updated {
                    match table_state.rows.get_mut(&record.id) {
                        Some(existing) => {
                            for (field, value) in record.fields {
                                existing.fields.insert(field, value);
                            }
                        }
                        None => {
                            table_state.rows.insert(record.id.clone(), record);
                        }
                    }
                }
                for id in table_patch.deleted {
                    table_state.rows.remove(&id);
                    table_state.tombstones.remove(&id);
                    table_state.reported_deleted.remove(&id);
                }
            }

            state.last_pulled_at = Some(checkpoint);
            deltas
        };
        // The whole application is one atomic write: exactly one notice,
        // even for an empty patch (the checkpoint still moved).
        self.notify(notice_tables);
        Ok(deltas)
    }

    async fn last_pulled_at(&self) -> Result<Option<TimestampMs>> {
        Ok(self.state.lock().last_pulled_at)
    }

    fn observe_changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }
}

struct GatewaySubscription {
    table: TableName,
    filter: Option<RemoteFilter>,
    sender: mpsc::UnboundedSender<RemoteEvent>,
}

#[derive(Default)]
struct GatewayState {
    tables: HashMap<TableName, Vec<Value>>,
    pk_columns: HashMap<TableName, String>,
}

/// In-memory [`RemoteGateway`].
///
/// Assigns sequential primary keys (`r1`, `r2`, …) on insert and fans
/// realtime events out to matching subscriptions — including events caused
/// by the engine's own pushes, which is exactly what the subscription pause
/// bracket exists to absorb.
#[derive(Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
    subscriptions: Arc<DashMap<SubscriptionId, GatewaySubscription>>,
    writes: Arc<AtomicU64>,
    next_pk: Arc<AtomicU64>,
    fail_next_select: Arc<Mutex<Option<String>>>,
    fail_next_write: Arc<Mutex<Option<String>>>,
    latency: Arc<Mutex<Option<std::time::Duration>>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            subscriptions: Arc::new(DashMap::new()),
            writes: Arc::new(AtomicU64::new(0)),
            next_pk: Arc::new(AtomicU64::new(1)),
            fail_next_select: Arc::new(Mutex::new(None)),
            fail_next_write: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(None)),
        }
    }

    /// Delay every query and write by the given duration, to simulate a
    /// slow network and hold cycles open mid-flight in tests.
    pub fn set_latency(&self, delay: std::time::Duration) {
        *self.latency.lock() = Some(delay);
    }

    async fn simulate_latency(&self) {
        let delay = *self.latency.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Configure the primary key column of a table (default `id`).
    pub fn set_pk_column(&self, table: &str, column: &str) {
        self.state
            .lock()
            .pk_columns
            .insert(table.to_owned(), column.to_owned());
    }

    /// Add a row without firing events or counting a write. The row must
    /// already carry its primary key.
    pub fn seed(&self, table: &str, row: Value) {
        self.state
            .lock()
            .tables
            .entry(table.to_owned())
            .or_default()
            .push(row);
    }

    /// All rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// A row by primary key.
    pub fn row(&self, table: &str, pk: &str) -> Option<Value> {
        let state = self.state.lock();
        let pk_column = pk_column_of(&state, table);
        state.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| {
                    read_value_field(row, &pk_column).and_then(value_to_id).as_deref() == Some(pk)
                })
                .cloned()
        })
    }

    /// Number of remote writes performed (updates + inserts).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Number of open realtime subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Fail the next read operation with the given message.
    pub fn fail_next_select(&self, message: &str) {
        *self.fail_next_select.lock() = Some(message.to_owned());
    }

    /// Fail the next write operation with the given message.
    pub fn fail_next_write(&self, message: &str) {
        *self.fail_next_write.lock() = Some(message.to_owned());
    }

    fn take_select_failure(&self, table: &str) -> Result<()> {
        match self.fail_next_select.lock().take() {
            Some(message) => Err(Error::Gateway {
                table: table.to_owned(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn take_write_failure(&self, table: &str) -> Result<()> {
        match self.fail_next_write.lock().take() {
            Some(message) => Err(Error::Gateway {
                table: table.to_owned(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn emit(&self, table: &str, kind: RemoteEventKind, row: &Value) {
        let mut dead = Vec::new();
        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            if sub.table != table {
                continue;
            }
            if let Some(filter) = &sub.filter {
                if !filter_matches(row, filter) {
                    continue;
                }
            }
            let event = RemoteEvent {
                table: table.to_owned(),
                kind,
                row: row.clone(),
            };
            if sub.sender.send(event).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for id in dead {
            self.subscriptions.remove(&id);
        }
    }
}

fn pk_column_of(state: &GatewayState, table: &str) -> String {
    state
        .pk_columns
        .get(table)
        .cloned()
        .unwrap_or_else(|| "id".to_owned())
}

/// Evaluate a filter column against a row, understanding the rendered
/// JSON-path syntax (`meta->>slug`, `a->b->>c`).
fn column_value(row: &Value, column: &str) -> Option<Value> {
    if column.contains("->") {
        let dotted: Vec<String> = column
            .split("->")
            .map(|segment| segment.trim_start_matches('>').to_owned())
            .collect();
        return crate::fields::extract_value_path(row, &dotted.join("."));
    }
    read_value_field(row, column).cloned()
}

fn filter_matches(row: &Value, filter: &RemoteFilter) -> bool {
    match filter {
        RemoteFilter::Eq { column, value } => match column_value(row, column) {
            Some(found) => {
                found == *value
                    || matches!(
                        (value_to_id(&found), value_to_id(value)),
                        (Some(a), Some(b)) if a == b
                    )
            }
            None => false,
        },
        RemoteFilter::Gte { column, value } => {
            let found = column_value(row, column);
            timestamp_ms(found.as_ref()) >= timestamp_ms(Some(value))
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn select_page(
        &self,
        table: &str,
        filters: &[RemoteFilter],
        from: usize,
        to: usize,
    ) -> Result<Vec<Value>> {
        self.simulate_latency().await;
        self.take_select_failure(table)?;
        let state = self.state.lock();
        let matching: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| filter_matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if from >= matching.len() {
            return Ok(Vec::new());
        }
        let end = (to + 1).min(matching.len());
        Ok(matching[from..end].to_vec())
    }

    async fn select_by_pk(&self, table: &str, pk_column: &str, pk: &str) -> Result<Option<Value>> {
        self.simulate_latency().await;
        self.take_select_failure(table)?;
        let state = self.state.lock();
        Ok(state.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| {
                    read_value_field(row, pk_column).and_then(value_to_id).as_deref() == Some(pk)
                })
                .cloned()
        }))
    }

    async fn select_one(&self, table: &str, filters: &[RemoteFilter]) -> Result<Option<Value>> {
        self.simulate_latency().await;
        self.take_select_failure(table)?;
        let state = self.state.lock();
        let matching: Vec<&Value> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| filter_matches(row, f)))
                    .collect()
            })
            .unwrap_or_default();
        if matching.len() > 1 {
            return Err(Error::Gateway {
                table: table.to_owned(),
                message: format!("expected at most one row, found {}", matching.len()),
            });
        }
        Ok(matching.first().map(|row| (*row).clone()))
    }

    async fn update_by_pk(
        &self,
        table: &str,
        pk_column: &str,
        pk: &str,
        payload: Map<String, Value>,
    ) -> Result<Vec<Value>> {
        self.simulate_latency().await;
        self.take_write_failure(table)?;
        self.writes.fetch_add(1, Ordering::AcqRel);
        let updated = {
            let mut state = self.state.lock();
            let rows = state.tables.entry(table.to_owned()).or_default();
            let found = rows.iter_mut().find(|row| {
                read_value_field(row, pk_column).and_then(value_to_id).as_deref() == Some(pk)
            });
            match found {
                Some(row) => {
                    if let Some(fields) = row.as_object_mut() {
                        for (name, value) in payload {
                            fields.insert(name, value);
                        }
                    }
                    Some(row.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(row) => {
                self.emit(table, RemoteEventKind::Update, &row);
                Ok(vec![row])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn insert(&self, table: &str, payload: Map<String, Value>) -> Result<Value> {
        self.simulate_latency().await;
        self.take_write_failure(table)?;
        self.writes.fetch_add(1, Ordering::AcqRel);
        let row = {
            let mut state = self.state.lock();
            let pk_column = pk_column_of(&state, table);
            let mut fields = payload;
            let needs_pk = match fields.get(&pk_column) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if needs_pk {
                let pk = format!("r{}", self.next_pk.fetch_add(1, Ordering::AcqRel));
                fields.insert(pk_column, Value::String(pk));
            }
            let row = Value::Object(fields);
            state.tables.entry(table.to_owned()).or_default().push(row.clone());
            row
        };
        self.emit(table, RemoteEventKind::Insert, &row);
        Ok(row)
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: Option<RemoteFilter>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<RemoteEvent>)> {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions.insert(
            id.clone(),
            GatewaySubscription {
                table: table.to_owned(),
                filter,
                sender,
            },
        );
        Ok((id, receiver))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.subscriptions.remove(id);
        Ok(())
    }
}
