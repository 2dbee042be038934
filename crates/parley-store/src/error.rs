use parley_core::PlatformError;
use thiserror::Error;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id exists.
    #[error("record not found: {0}")]
    NotFound(String),

    /// `create` was called with an id that already exists.
    #[error("duplicate id: {0}")]
    Duplicate(String),

    /// The update patch was not a JSON object, or produced an invalid record.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),

    /// The backend hit a transient condition (lock contention, busy handle).
    /// Callers may retry the operation.
    #[error("transient database error: {0}")]
    Transient(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<StoreError> for PlatformError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => PlatformError::NotFound(id),
            StoreError::Duplicate(id) => PlatformError::InvalidInput(format!("duplicate id: {id}")),
            StoreError::InvalidPatch(msg) => PlatformError::InvalidInput(msg),
            StoreError::Serialization(e) => PlatformError::Parse(e.to_string()),
            StoreError::Database(msg) | StoreError::Transient(msg) => PlatformError::Storage(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
