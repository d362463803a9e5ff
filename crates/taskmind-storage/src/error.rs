//! Error types for the persistence layer.

use rusqlite::types::Value;
use thiserror::Error;

use taskmind_core::error::TaskmindError;
use taskmind_core::lifecycle::InvalidTransition;

/// Errors raised by the storage crate.
///
/// Lookup misses are not errors: `find_by_id`, `find_one` and `delete`
/// report them through `Option`/`bool` return values.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {source} (sql: {sql}; params: {params:?})")]
    Query {
        sql: String,
        params: Vec<Value>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Migration {unit} failed: {source}")]
    Migration {
        unit: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Post-update fetch failed for {entity} {id}")]
    PostUpdateFetchFailed { entity: &'static str, id: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wrap a driver error together with the statement that produced it.
    pub fn query(sql: &str, params: &[Value], source: rusqlite::Error) -> Self {
        StorageError::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
            source,
        }
    }

    pub fn migration(unit: &str, source: StorageError) -> Self {
        StorageError::Migration {
            unit: unit.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

impl From<TaskmindError> for StorageError {
    fn from(err: TaskmindError) -> Self {
        match err {
            TaskmindError::InvalidTransition(e) => StorageError::InvalidTransition(e),
            TaskmindError::NotFound { entity, id } => StorageError::NotFound { entity, id },
            TaskmindError::Io(e) => StorageError::Io(e),
            other => StorageError::Codec(other.to_string()),
        }
    }
}

impl From<StorageError> for TaskmindError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => TaskmindError::NotFound { entity, id },
            StorageError::InvalidTransition(e) => TaskmindError::InvalidTransition(e),
            StorageError::Io(e) => TaskmindError::Io(e),
            other => TaskmindError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
