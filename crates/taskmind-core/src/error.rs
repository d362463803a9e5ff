use thiserror::Error;

use crate::lifecycle::InvalidTransition;

/// Top-level error type for Taskmind.
///
/// The storage crate defines its own richer error type and implements
/// `From<StorageError> for TaskmindError` so that `?` works across the
/// crate boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskmindError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for TaskmindError {
    fn from(err: toml::de::Error) -> Self {
        TaskmindError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TaskmindError {
    fn from(err: toml::ser::Error) -> Self {
        TaskmindError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TaskmindError {
    fn from(err: serde_json::Error) -> Self {
        TaskmindError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Taskmind operations.
pub type Result<T> = std::result::Result<T, TaskmindError>;
