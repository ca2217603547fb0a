// ABOUTME: Error type for the SQLite record store and its writer thread.
// ABOUTME: Converts into the repository-boundary error consumed by day caches.

use daybook_core::record::RecordError;
use daybook_core::repository::RepositoryError;
use thiserror::Error;

use crate::schema::SchemaError;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] SchemaError),

    #[error("stored record {id} could not be decoded: {source}")]
    Decode {
        id: String,
        #[source]
        source: RecordError,
    },

    #[error("event {event_id} could not be decoded: {source}")]
    CorruptEvent {
        event_id: i64,
        #[source]
        source: RecordError,
    },

    #[error("store is closed")]
    Closed,
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => RepositoryError::Closed,
            other => RepositoryError::backend(other),
        }
    }
}
