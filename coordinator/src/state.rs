//! Coordinator state snapshot.

use serde::{Deserialize, Serialize};
use tether_engine::{TableName, TimestampMs};

/// A snapshot of the coordinator's observable state.
///
/// Emitted as a `state` event whenever any field changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Whether auto-sync is running.
    pub running: bool,
    /// Labels of tables currently being pulled or pushed.
    pub in_progress: Vec<String>,
    /// Start instant of the last completed cycle.
    pub last_sync_at: Option<TimestampMs>,
    /// Local tables registered at construction.
    pub registered_tables: Vec<TableName>,
    /// Number of failed cycles since construction.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_uses_camel_case() {
        let state = SyncState {
            running: true,
            in_progress: vec!["tasks".into()],
            last_sync_at: Some(1000),
            registered_tables: vec!["tasks".into()],
            errors: 0,
        };
        let text = serde_json::to_string(&state).unwrap();
        assert!(text.contains("inProgress"));
        assert!(text.contains("lastSyncAt"));
        assert!(text.contains("registeredTables"));

        let parsed: SyncState = serde_json::from_str(&text).unwrap();
        assert_eq!(state, parsed);
    }
}
