// ABOUTME: Test utilities for daybook-core, including an in-memory repository with failure injection.
// ABOUTME: Used in tests to drive day caches and the registry without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::event::{Event, EventType};
use crate::record::{Record, now_millis};
use crate::repository::{RecordRepository, RepositoryError};

/// Error returned by [`MemoryRepository`] when a failure has been injected.
#[derive(Debug, Clone, Error)]
#[error("injected failure: {0}")]
pub struct InjectedFailure(pub &'static str);

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    events: Vec<Event>,
    failing_writes: usize,
    fail_reads: bool,
    date_scans: usize,
}

impl State {
    fn append(&mut self, event_type: EventType, payload: Record) {
        let event_id = self.events.len() as i64 + 1;
        self.events.push(Event {
            event_id,
            event_type,
            record_id: payload.id.clone(),
            payload,
            timestamp: now_millis(),
            device_id: None,
        });
    }

    fn take_write_failure(&mut self) -> Result<(), RepositoryError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(RepositoryError::backend(InjectedFailure("write")));
        }
        Ok(())
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads {
            return Err(RepositoryError::backend(InjectedFailure("read")));
        }
        Ok(())
    }
}

/// A [`RecordRepository`] backed by a HashMap and an event Vec.
///
/// Writes and events happen together under one lock, matching the
/// atomicity of the SQLite store.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records directly, appending a saved event for each.
    pub fn seed(&self, records: Vec<Record>) {
        let mut state = self.lock();
        for record in records {
            state.records.insert(record.id.clone(), record.clone());
            state.append(EventType::Saved, record);
        }
    }

    /// Make the next `n` save or delete calls fail without side effects.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failing_writes = n;
    }

    /// Make every read fail until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.lock().records.get(id).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Content of every saved event for `id`, oldest first.
    pub fn saved_contents(&self, id: &str) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.record_id == id && e.event_type == EventType::Saved)
            .map(|e| e.payload.content.clone())
            .collect()
    }

    /// Number of `get_records_for_date` calls that reached the data.
    pub fn date_scans(&self) -> usize {
        self.lock().date_scans
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn save_record(&self, record: Record) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        state.take_write_failure()?;
        let record = match state.records.get(&record.id) {
            Some(existing) => Record {
                created_at: existing.created_at,
                ..record
            },
            None => record,
        };
        state.records.insert(record.id.clone(), record.clone());
        state.append(EventType::Saved, record);
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        state.take_write_failure()?;
        match state.records.remove(id) {
            Some(record) => {
                state.append(EventType::Deleted, record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_records_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, RepositoryError> {
        let mut state = self.lock();
        state.check_reads()?;
        state.date_scans += 1;
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.order_position.total_cmp(&b.order_position));
        Ok(records)
    }

    async fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, RepositoryError> {
        let state = self.lock();
        state.check_reads()?;
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.to_lowercase();
        let mut hits: Vec<Record> = state
            .records
            .values()
            .filter(|r| start.is_none_or(|s| r.date >= s))
            .filter(|r| end.is_none_or(|e| r.date <= e))
            .filter(|r| r.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.order_position.total_cmp(&b.order_position))
        });
        Ok(hits)
    }

    async fn latest_event_id(&self) -> Result<Option<i64>, RepositoryError> {
        let state = self.lock();
        state.check_reads()?;
        Ok(state.events.last().map(|e| e.event_id))
    }
}

/// Wraps a [`MemoryRepository`] so that every call waits for a permit.
/// Lets a test hold work in flight and observe the state around it.
pub struct GatedRepository {
    inner: Arc<MemoryRepository>,
    gate: Semaphore,
}

impl GatedRepository {
    /// A closed gate in front of `inner`.
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    /// Let the next `calls` repository calls through.
    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    async fn pass(&self) -> Result<(), RepositoryError> {
        let permit = self.gate.acquire().await.map_err(|_| RepositoryError::Closed)?;
        permit.forget();
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for GatedRepository {
    async fn save_record(&self, record: Record) -> Result<(), RepositoryError> {
        self.pass().await?;
        self.inner.save_record(record).await
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RepositoryError> {
        self.pass().await?;
        self.inner.delete_record(id).await
    }

    async fn get_records_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, RepositoryError> {
        self.pass().await?;
        self.inner.get_records_for_date(date).await
    }

    async fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, RepositoryError> {
        self.pass().await?;
        self.inner.search(query, start, end).await
    }

    async fn latest_event_id(&self) -> Result<Option<i64>, RepositoryError> {
        self.pass().await?;
        self.inner.latest_event_id().await
    }
}
