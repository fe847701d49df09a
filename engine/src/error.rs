//! Error types for the Tether engine.

use crate::{RecordId, TableName};
use thiserror::Error;

/// All possible errors from the Tether engine.
///
/// The error is `Clone` so the coordinator can hand the same cycle failure
/// to every queued waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("descriptor for table '{table}' is missing required field: {field}")]
    MissingDescriptorField { table: TableName, field: String },

    #[error("table '{0}' is registered more than once")]
    DuplicateTable(TableName),

    // Data integrity violations
    #[error("record '{record}' in table '{table}' has no value at key path '{path}'")]
    MissingKeyPath {
        table: TableName,
        record: RecordId,
        path: String,
    },

    #[error("duplicate unique key {key} among local rows of table '{table}'")]
    DuplicateLocalKey { table: TableName, key: String },

    #[error("duplicate unique key {key} among remote rows of table '{table}'")]
    DuplicateRemoteKey { table: TableName, key: String },

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    // Transport-shaped errors from the trait seams
    #[error("remote gateway error on table '{table}': {message}")]
    Gateway { table: TableName, message: String },

    #[error("local store error on table '{table}': {message}")]
    Store { table: TableName, message: String },

    #[error("sync cycle interrupted before completion")]
    Interrupted,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
