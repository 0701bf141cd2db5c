//! Store error types

use thiserror::Error;

/// Errors that can occur during state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Key-value store error: {0}")]
    KeyValue(#[from] redis::RedisError),

    #[error("Failed to encode instance {instance_id}: {source}")]
    Encode {
        instance_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode instance {instance_id}: {reason}")]
    Decode { instance_id: String, reason: String },

    #[error("Invalid instance id: {0:?}")]
    InvalidInstanceId(String),

    #[error("Backend handle poisoned: {0}")]
    Poisoned(&'static str),
}

impl StoreError {
    pub(crate) fn decode(instance_id: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Decode {
            instance_id: instance_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the stored payload for a record was unreadable
    pub fn is_decode(&self) -> bool {
        matches!(self, StoreError::Decode { .. })
    }

    /// Check if retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(_) => true,
            StoreError::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            StoreError::KeyValue(err) => {
                err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
            }
            StoreError::Encode { .. } => false,
            StoreError::Decode { .. } => false,
            StoreError::InvalidInstanceId(_) => false,
            StoreError::Poisoned(_) => false,
        }
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
