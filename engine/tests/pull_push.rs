//! Pull/Push algorithm tests against the in-memory seams.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tether_engine::{
    Error, LocalRecord, LocalStore, ManualClock, MemoryGateway, MemoryStore, PushOutcome,
    ReentrancyGuard, SyncContext, SyncDescriptor, TableDeltas, TableEngine, TimeProvider,
};

const JAN_2025_MS: i64 = 1_735_689_600_000;

struct Harness {
    store: Arc<MemoryStore>,
    gateway: Arc<MemoryGateway>,
    guard: Arc<ReentrancyGuard>,
    clock: Arc<ManualClock>,
    engine: TableEngine,
}

fn harness(descriptor: SyncDescriptor) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MemoryGateway::new());
    let guard = Arc::new(ReentrancyGuard::new());
    let clock = Arc::new(ManualClock::new(JAN_2025_MS));
    let engine = TableEngine::new(
        Arc::new(descriptor),
        store.clone(),
        gateway.clone(),
        guard.clone(),
        clock.clone(),
        SyncContext::new(),
    );
    Harness {
        store,
        gateway,
        guard,
        clock,
        engine,
    }
}

fn tasks_descriptor() -> SyncDescriptor {
    SyncDescriptor::new("tasks", "tasks")
}

/// One full pull → apply → push pass, the way the coordinator drives it.
async fn cycle(h: &Harness, ctx: &SyncContext) -> PushOutcome {
    let since = h.store.checkpoint();
    let now = h.clock.now_ms();
    let outcome = h.engine.pull(since, ctx).await.unwrap();
    let mut patch = HashMap::new();
    patch.insert("tasks".to_string(), outcome.patch);
    let deltas = h.store.apply_sync_patch(patch, now).await.unwrap();
    match deltas.get("tasks") {
        Some(t) => h.engine.push(t, ctx).await.unwrap(),
        None => PushOutcome::default(),
    }
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn first_pull_creates_local_rows() {
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "A", "updated_at": "2025-01-01T00:00:00Z", "is_deleted": false}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert_eq!(outcome.patch.created.len(), 1);
    assert!(outcome.patch.updated.is_empty());
    assert!(outcome.patch.deleted.is_empty());
    assert_eq!(outcome.max_remote_updated_at, Some(JAN_2025_MS));

    let created = &outcome.patch.created[0];
    assert_eq!(created.id, "tasks:R1");
    assert_eq!(created.field("title"), Some(&json!("A")));
    assert_eq!(created.field("remote_id"), Some(&json!("R1")));
    assert_eq!(created.field("updated_at"), Some(&json!(JAN_2025_MS)));
    assert_eq!(created.field("is_deleted"), Some(&json!(false)));

    // Pull never writes to the remote.
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn pull_is_idempotent_against_unchanged_remote() {
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "A", "updated_at": "2025-01-01T00:00:00Z", "is_deleted": false}),
    );

    cycle(&h, &SyncContext::new()).await;

    // Same checkpoint, unchanged remote: the second patch is empty.
    let again = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert!(again.patch.is_empty());
}

#[tokio::test]
async fn pull_applies_strictly_newer_remote_updates() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "local", "remote_id": "R1", "updated_at": 1000}),
        ),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "remote", "updated_at": "1970-01-01T00:00:02Z", "is_deleted": false}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert_eq!(outcome.patch.updated.len(), 1);
    let updated = &outcome.patch.updated[0];
    assert_eq!(updated.id, "L1");
    assert_eq!(updated.field("title"), Some(&json!("remote")));
    assert_eq!(updated.field("updated_at"), Some(&json!(2000)));
}

#[tokio::test]
async fn pull_skips_rows_the_local_side_already_has() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "same", "remote_id": "R1", "updated_at": 2000}),
        ),
    );
    // Equal timestamp: remote merely caught up; reapplying would churn.
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "same", "updated_at": "1970-01-01T00:00:02Z", "is_deleted": false}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert!(outcome.patch.is_empty());
}

#[tokio::test]
async fn pull_propagates_remote_soft_deletes() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "A", "remote_id": "R1", "updated_at": 1000}),
        ),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "updated_at": "1970-01-01T00:00:05Z", "is_deleted": true}),
    );
    // A deletion for a row this device never had is ignored.
    h.gateway.seed(
        "tasks",
        json!({"id": "R2", "updated_at": "1970-01-01T00:00:05Z", "is_deleted": true}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert_eq!(outcome.patch.deleted, vec!["L1".to_string()]);
    assert!(outcome.patch.created.is_empty());
}

#[tokio::test]
async fn pull_matches_by_unique_key_when_remote_id_is_unknown() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "Alpha", "remote_id": "", "updated_at": 1000}),
        ),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "Alpha", "updated_at": "1970-01-01T00:00:01.500Z", "is_deleted": false}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    // The remote row lands on the existing local record, not a duplicate.
    assert!(outcome.patch.created.is_empty());
    assert_eq!(outcome.patch.updated.len(), 1);
    let updated = &outcome.patch.updated[0];
    assert_eq!(updated.id, "L1");
    assert_eq!(updated.field("remote_id"), Some(&json!("R1")));
    assert_eq!(updated.field("updated_at"), Some(&json!(1500)));
}

#[tokio::test]
async fn pull_rejects_duplicate_remote_unique_keys() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "Alpha", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R2", "title": "Alpha", "updated_at": "1970-01-01T00:00:02Z", "is_deleted": false}),
    );

    let err = h.engine.pull(None, &SyncContext::new()).await.unwrap_err();
    assert_eq!(
        err,
        Error::DuplicateRemoteKey {
            table: "tasks".into(),
            key: "[\"Alpha\"]".into(),
        }
    );
}

#[tokio::test]
async fn pull_reads_unique_keys_out_of_json_columns() {
    let h = harness(tasks_descriptor().with_unique_key("meta.slug", "meta.slug"));
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"meta": "{\"slug\":\"a-1\"}", "remote_id": "", "updated_at": 1000}),
        ),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "meta": {"slug": "a-1"}, "updated_at": "1970-01-01T00:00:02Z", "is_deleted": false}),
    );

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert!(outcome.patch.created.is_empty());
    assert_eq!(outcome.patch.updated.len(), 1);
    assert_eq!(outcome.patch.updated[0].id, "L1");
}

#[tokio::test]
async fn pull_restricts_to_the_scoped_user() {
    let h = harness(tasks_descriptor().with_scope("user_id"));
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "user_id": "U1", "title": "mine", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );
    h.gateway.seed(
        "tasks",
        json!({"id": "R2", "user_id": "U2", "title": "theirs", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );

    let outcome = h
        .engine
        .pull(None, &SyncContext::for_user("U1"))
        .await
        .unwrap();
    assert_eq!(outcome.patch.created.len(), 1);
    assert_eq!(outcome.patch.created[0].field("title"), Some(&json!("mine")));
}

#[tokio::test]
async fn pull_pages_until_a_short_page() {
    let h = harness(tasks_descriptor());
    for n in 0..1005 {
        h.gateway.seed(
            "tasks",
            json!({"id": format!("R{n}"), "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
        );
    }

    let outcome = h.engine.pull(None, &SyncContext::new()).await.unwrap();
    assert_eq!(outcome.patch.created.len(), 1005);
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_inserts_new_records_and_writes_back_identity() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "B", "remote_id": "", "updated_at": 1000}),
        ),
    );

    let outcome = cycle(&h, &SyncContext::new()).await;
    assert_eq!(outcome.upserted, vec!["L1".to_string()]);
    assert!(outcome.conflicts.is_empty());

    let remote_rows = h.gateway.rows("tasks");
    assert_eq!(remote_rows.len(), 1);
    assert_eq!(remote_rows[0]["title"], json!("B"));
    assert_eq!(
        remote_rows[0]["updated_at"],
        json!("1970-01-01T00:00:01.000Z")
    );
    let remote_id = remote_rows[0]["id"].as_str().unwrap().to_string();

    let local = h.store.get("tasks", "L1").unwrap();
    assert_eq!(local.field("remote_id"), Some(&json!(remote_id)));
    assert_eq!(local.field("updated_at"), Some(&json!(1000)));

    // The write-back left exactly one suppression credit.
    assert_eq!(h.guard.depth(), 1);
}

#[tokio::test]
async fn push_with_no_local_changes_performs_no_remote_writes() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "B", "remote_id": "", "updated_at": 1000}),
        ),
    );

    cycle(&h, &SyncContext::new()).await;
    let writes_after_first = h.gateway.write_count();
    assert_eq!(writes_after_first, 1);

    // The write-back dirtied the row; the follow-up cycle sees the remote
    // copy is just as new and touches nothing.
    h.clock.advance(60_000);
    let outcome = cycle(&h, &SyncContext::new()).await;
    assert!(outcome.upserted.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(h.gateway.write_count(), writes_after_first);

    // Quiescent from here on.
    h.clock.advance(60_000);
    let outcome = cycle(&h, &SyncContext::new()).await;
    assert!(outcome.is_empty());
    assert_eq!(h.gateway.write_count(), writes_after_first);
}

#[tokio::test]
async fn push_updates_remote_when_local_is_newer() {
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "old", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "new", "remote_id": "R1", "updated_at": 5000}),
        ),
    );

    let deltas = TableDeltas {
        updated: vec!["L1".into()],
        ..Default::default()
    };
    let outcome = h.engine.push(&deltas, &SyncContext::new()).await.unwrap();
    assert_eq!(outcome.upserted, vec!["L1".to_string()]);

    let row = h.gateway.row("tasks", "R1").unwrap();
    assert_eq!(row["title"], json!("new"));
    assert_eq!(row["updated_at"], json!("1970-01-01T00:00:05.000Z"));
}

#[tokio::test]
async fn push_skips_when_remote_is_at_least_as_new() {
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "remote", "updated_at": "1970-01-01T00:00:05Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "local", "remote_id": "R1", "updated_at": 5000}),
        ),
    );

    let deltas = TableDeltas {
        updated: vec!["L1".into()],
        ..Default::default()
    };
    let outcome = h.engine.push(&deltas, &SyncContext::new()).await.unwrap();

    // Ties break toward the remote to stop symmetric update cycles.
    assert!(outcome.upserted.is_empty());
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].remote_id, "R1");
    assert_eq!(outcome.conflicts[0].local_updated_at, 5000);
    assert_eq!(outcome.conflicts[0].remote_updated_at, 5000);
    assert_eq!(h.gateway.write_count(), 0);
    assert_eq!(
        h.gateway.row("tasks", "R1").unwrap()["title"],
        json!("remote")
    );
}

#[tokio::test]
async fn push_adopts_remote_rows_by_unique_key_instead_of_inserting() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "Alpha", "updated_at": "1970-01-01T00:00:01.500Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "Alpha", "remote_id": "", "updated_at": 1000}),
        ),
    );

    let outcome = cycle(&h, &SyncContext::new()).await;
    // Matched during pull, adopted, then the push skipped: remote newer.
    assert!(outcome.upserted.is_empty());
    assert_eq!(h.gateway.rows("tasks").len(), 1);

    let local = h.store.get("tasks", "L1").unwrap();
    assert_eq!(local.field("remote_id"), Some(&json!("R1")));
    assert_eq!(local.field("updated_at"), Some(&json!(1500)));
}

#[tokio::test]
async fn push_resolves_targets_by_unique_key_without_a_pull() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "Alpha", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "Alpha", "remote_id": "", "updated_at": 9000}),
        ),
    );

    let deltas = TableDeltas {
        created: vec!["L1".into()],
        ..Default::default()
    };
    let outcome = h.engine.push(&deltas, &SyncContext::new()).await.unwrap();

    // No second remote row appears; the existing one is updated in place.
    assert_eq!(outcome.upserted, vec!["L1".to_string()]);
    assert_eq!(h.gateway.rows("tasks").len(), 1);
    let local = h.store.get("tasks", "L1").unwrap();
    assert_eq!(local.field("remote_id"), Some(&json!("R1")));
}

#[tokio::test]
async fn push_soft_deletes_then_upserts() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "Alpha", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "Alpha", "remote_id": "R1", "updated_at": 1000, "is_deleted": false}),
        ),
    );
    h.store.apply_sync_patch(HashMap::new(), 1).await.unwrap();

    // Delete the synced row, then re-create the same unique key.
    h.store.delete("tasks", "L1");
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L2",
            json!({"title": "Alpha", "remote_id": "", "updated_at": 2000, "is_deleted": false}),
        ),
    );

    let deltas = h.store.apply_sync_patch(HashMap::new(), 2).await.unwrap();
    let outcome = h
        .engine
        .push(&deltas["tasks"], &SyncContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.soft_deleted, vec!["L1".to_string()]);
    assert_eq!(outcome.upserted, vec!["L2".to_string()]);

    // The predecessor was tombstoned before the unique-key lookup ran, so
    // the new row did not collide with it.
    let rows = h.gateway.rows("tasks");
    assert_eq!(rows.len(), 2);
    let old = h.gateway.row("tasks", "R1").unwrap();
    assert_eq!(old["is_deleted"], json!(true));
    assert_eq!(old["updated_at"], json!("2025-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn deleting_a_never_pushed_record_touches_nothing_remote() {
    let h = harness(tasks_descriptor());
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "A", "remote_id": "", "updated_at": 1000}),
        ),
    );
    h.store.apply_sync_patch(HashMap::new(), 1).await.unwrap();

    let deltas = TableDeltas {
        deleted: vec!["L1".into()],
        ..Default::default()
    };
    let outcome = h.engine.push(&deltas, &SyncContext::new()).await.unwrap();
    assert!(outcome.soft_deleted.is_empty());
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn push_injects_the_scope_user_into_payloads() {
    let h = harness(tasks_descriptor().with_scope("user_id"));
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "B", "remote_id": "", "updated_at": 1000}),
        ),
    );

    let deltas = TableDeltas {
        created: vec!["L1".into()],
        ..Default::default()
    };
    h.engine
        .push(&deltas, &SyncContext::for_user("U1"))
        .await
        .unwrap();

    let rows = h.gateway.rows("tasks");
    assert_eq!(rows[0]["user_id"], json!("U1"));
}

#[tokio::test]
async fn push_respects_the_record_filter() {
    let descriptor =
        tasks_descriptor().with_push_filter(|record, _| record.field("draft") != Some(&json!(true)));
    let h = harness(descriptor);
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "B", "draft": true, "remote_id": "", "updated_at": 1000}),
        ),
    );

    let deltas = TableDeltas {
        created: vec!["L1".into()],
        ..Default::default()
    };
    let outcome = h.engine.push(&deltas, &SyncContext::new()).await.unwrap();
    assert!(outcome.upserted.is_empty());
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn push_fails_on_missing_unique_key_paths() {
    let h = harness(tasks_descriptor().with_unique_key("title", "title"));
    h.store.insert(
        "tasks",
        LocalRecord::from_value("L1", json!({"remote_id": "", "updated_at": 1000})),
    );

    let deltas = TableDeltas {
        created: vec!["L1".into()],
        ..Default::default()
    };
    let err = h
        .engine
        .push(&deltas, &SyncContext::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::MissingKeyPath {
            table: "tasks".into(),
            record: "L1".into(),
            path: "title".into(),
        }
    );
}

#[tokio::test]
async fn remote_transport_errors_propagate() {
    let h = harness(tasks_descriptor());
    h.gateway.fail_next_select("connection reset");

    let err = h.engine.pull(None, &SyncContext::new()).await.unwrap_err();
    assert!(matches!(err, Error::Gateway { .. }));
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn soft_delete_round_trip_between_two_devices() {
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "A", "updated_at": "1970-01-01T00:00:01Z", "is_deleted": false}),
    );

    // Device one adopts the row, deletes it, pushes the tombstone.
    cycle(&h, &SyncContext::new()).await;
    assert!(h.store.get("tasks", "tasks:R1").is_some());
    h.store.delete("tasks", "tasks:R1");
    cycle(&h, &SyncContext::new()).await;

    let row = h.gateway.row("tasks", "R1").unwrap();
    assert_eq!(row["is_deleted"], json!(true));
    assert_eq!(h.gateway.rows("tasks").len(), 1);

    // Device two pulls the tombstone and drops its local copy.
    let second = harness(tasks_descriptor());
    second.gateway.seed("tasks", row);
    second.store.insert(
        "tasks",
        LocalRecord::from_value(
            "tasks:R1",
            json!({"title": "A", "remote_id": "R1", "updated_at": 1000}),
        ),
    );
    second
        .store
        .apply_sync_patch(HashMap::new(), 1)
        .await
        .unwrap();

    cycle(&second, &SyncContext::new()).await;
    assert!(second.store.get("tasks", "tasks:R1").is_none());
    // The remote row is still there, logically deleted.
    assert_eq!(second.gateway.rows("tasks").len(), 1);
}

#[tokio::test]
async fn concurrent_updates_converge_to_the_newest_writer() {
    // Local wrote at t=5000, remote at t=2000: local wins.
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "remote", "updated_at": "1970-01-01T00:00:02Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "local", "remote_id": "R1", "updated_at": 5000}),
        ),
    );

    cycle(&h, &SyncContext::new()).await;
    assert_eq!(
        h.gateway.row("tasks", "R1").unwrap()["title"],
        json!("local")
    );
    assert_eq!(
        h.store.get("tasks", "L1").unwrap().field("title"),
        Some(&json!("local"))
    );

    // Remote wrote at t=9000, local at t=5000: remote wins.
    let h = harness(tasks_descriptor());
    h.gateway.seed(
        "tasks",
        json!({"id": "R1", "title": "remote", "updated_at": "1970-01-01T00:00:09Z", "is_deleted": false}),
    );
    h.store.insert(
        "tasks",
        LocalRecord::from_value(
            "L1",
            json!({"title": "local", "remote_id": "R1", "updated_at": 5000}),
        ),
    );

    cycle(&h, &SyncContext::new()).await;
    assert_eq!(
        h.gateway.row("tasks", "R1").unwrap()["title"],
        json!("remote")
    );
    let local = h.store.get("tasks", "L1").unwrap();
    assert_eq!(local.field("title"), Some(&json!("remote")));
    assert_eq!(local.field("updated_at"), Some(&json!(9000)));
}
