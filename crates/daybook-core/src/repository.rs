// ABOUTME: The asynchronous repository contract between day caches and durable storage.
// ABOUTME: Implemented by the SQLite writer handle in daybook-store and by in-memory test doubles.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::record::Record;

/// Errors surfaced across the repository boundary.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("repository is closed")]
    Closed,
}

impl RepositoryError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RepositoryError::Backend(Box::new(err))
    }
}

/// Durable record storage. Every write is atomic with its event-log entry.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Upsert the record and append a `saved` event.
    async fn save_record(&self, record: Record) -> Result<(), RepositoryError>;

    /// Remove the record and append a `deleted` event. Returns false, with
    /// no event written, when the id does not exist.
    async fn delete_record(&self, id: &str) -> Result<bool, RepositoryError>;

    /// All records of a day, ascending by order position.
    async fn get_records_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, RepositoryError>;

    /// Substring search over content within an optional inclusive date range,
    /// newest day first and ascending by order position within a day.
    async fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, RepositoryError>;

    /// Id of the most recently appended event, if any.
    async fn latest_event_id(&self) -> Result<Option<i64>, RepositoryError>;
}
