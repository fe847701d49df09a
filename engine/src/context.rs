//! Per-sync context passed into mappings and scope-applying queries.

use serde::{Deserialize, Serialize};

/// Context for a sync invocation.
///
/// Merged from a per-engine default and a per-call override; the override
/// wins wherever it is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncContext {
    /// User the sync is scoped to, if any.
    pub user_id: Option<String>,
}

impl SyncContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context scoped to a user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    /// Merge a per-call override over this default.
    pub fn merged_with(&self, overlay: &SyncContext) -> SyncContext {
        SyncContext {
            user_id: overlay.user_id.clone().or_else(|| self.user_id.clone()),
        }
    }
}
