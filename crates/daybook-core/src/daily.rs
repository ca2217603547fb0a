// ABOUTME: Per-day state cache applying optimistic edits and rolling them back when persistence fails.
// ABOUTME: Publishes immutable DailySnapshot values over a watch channel; a writer task serializes durable writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;

use crate::position::allocate;
use crate::record::{Metadata, MetadataPatch, Record};
use crate::repository::{RecordRepository, RepositoryError};

/// Errors returned by cache operations. The cache state has already been
/// restored by the time a caller sees one of these.
#[derive(Debug, Error)]
pub enum DailyError {
    #[error("failed to load records for {date}: {source}")]
    Load {
        date: NaiveDate,
        #[source]
        source: RepositoryError,
    },

    #[error("failed to persist change to record {record_id}: {source}")]
    Persist {
        record_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("day cache writer has shut down")]
    WriterClosed,
}

/// Lifecycle of a day's in-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

/// Immutable view of one day, handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub records: BTreeMap<String, Record>,
    /// Latest event id observed by the last full load; lets a reload skip the
    /// table scan when nothing has been written since.
    pub last_event_id: Option<i64>,
    pub status: LoadStatus,
    pub error: Option<String>,
    /// Bumped by every dispose. Work queued before a dispose never writes
    /// into the state that follows it.
    pub generation: u64,
}

impl DailySnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            records: BTreeMap::new(),
            last_event_id: None,
            status: LoadStatus::Unloaded,
            error: None,
            generation: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Records in display order: ascending position, ties broken by id.
    pub fn ordered(&self) -> Vec<&Record> {
        let mut records: Vec<&Record> = self.records.values().collect();
        records.sort_by(|a, b| {
            a.order_position
                .total_cmp(&b.order_position)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Position for a new record at the top of the day.
    pub fn position_at_start(&self) -> f64 {
        allocate(None, self.ordered().first().map(|r| r.order_position))
    }

    /// Position for a new record at the bottom of the day.
    pub fn position_at_end(&self) -> f64 {
        allocate(self.ordered().last().map(|r| r.order_position), None)
    }

    /// Position directly after `anchor`, or None when the anchor is not present.
    pub fn position_after(&self, anchor: &str) -> Option<f64> {
        let ordered = self.ordered();
        let idx = ordered.iter().position(|r| r.id == anchor)?;
        let before = ordered[idx].order_position;
        let after = ordered.get(idx + 1).map(|r| r.order_position);
        Some(allocate(Some(before), after))
    }

    /// Position directly before `anchor`, or None when the anchor is not present.
    pub fn position_before(&self, anchor: &str) -> Option<f64> {
        let ordered = self.ordered();
        let idx = ordered.iter().position(|r| r.id == anchor)?;
        let before = idx.checked_sub(1).map(|i| ordered[i].order_position);
        Some(allocate(before, Some(ordered[idx].order_position)))
    }
}

enum WriteOp {
    Save(Record),
    Delete(String),
}

impl WriteOp {
    fn record_id(&self) -> &str {
        match self {
            WriteOp::Save(record) => &record.id,
            WriteOp::Delete(id) => id,
        }
    }
}

enum Job {
    Load {
        base: DailySnapshot,
        reply: oneshot::Sender<Result<(), DailyError>>,
    },
    Write {
        op: WriteOp,
        previous: DailySnapshot,
        reply: oneshot::Sender<Result<(), DailyError>>,
    },
}

/// Authoritative in-memory state for one calendar day.
///
/// Every mutation is applied to memory and published before any I/O. The
/// matching durable write is queued in the same step, so writes reach the
/// repository in the order the mutations were applied. A failed write puts
/// back the state captured just before its mutation, records the error, and
/// publishes again.
pub struct DailyStateCache {
    date: NaiveDate,
    state: Arc<watch::Sender<DailySnapshot>>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl DailyStateCache {
    /// Create an unloaded cache and spawn its writer task on the current
    /// tokio runtime. The task ends when the cache is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(date: NaiveDate, repo: Arc<dyn RecordRepository>) -> Self {
        let (state, _) = watch::channel(DailySnapshot::new(date));
        let state = Arc::new(state);
        let (jobs, rx) = mpsc::unbounded_channel();

        let writer = DayWriter {
            date,
            repo,
            state: Arc::clone(&state),
            rx,
        };
        tokio::spawn(writer.run());

        Self { date, state, jobs }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn snapshot(&self) -> DailySnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DailySnapshot> {
        self.state.subscribe()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn updates(&self) -> WatchStream<DailySnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Fetch the day's records. Runs after every write already queued, so it
    /// observes them. Edits applied while the fetch is in flight are
    /// carried over onto the fetched rows.
    pub async fn load(&self) -> Result<(), DailyError> {
        let mut queued = None;
        self.state.send_modify(|s| {
            let base = s.clone();
            let (reply, rx) = oneshot::channel();
            if self.jobs.send(Job::Load { base, reply }).is_ok() {
                s.status = LoadStatus::Loading;
                queued = Some(rx);
            }
        });
        match queued {
            Some(rx) => rx.await.map_err(|_| DailyError::WriterClosed)?,
            None => Err(DailyError::WriterClosed),
        }
    }

    /// Create a record of the metadata's type at `position`. The position is
    /// taken as given; a collision with a sibling is not rejected here and
    /// [`DailySnapshot::ordered`] breaks such ties by id.
    pub async fn create(
        &self,
        metadata: Metadata,
        content: impl Into<String>,
        position: f64,
    ) -> Result<Record, DailyError> {
        let record = Record::new(self.date, metadata, content, position);
        let created = self
            .mutate(|s| {
                s.records.insert(record.id.clone(), record.clone());
                Some((WriteOp::Save(record.clone()), record.clone()))
            })
            .await?;
        Ok(created.unwrap_or(record))
    }

    /// Merge `patch` into a record's metadata. Returns None when the record is
    /// not in memory. A patch with no fields for the record's type changes
    /// nothing and writes nothing.
    pub async fn update_metadata(
        &self,
        id: &str,
        patch: MetadataPatch,
    ) -> Result<Option<Record>, DailyError> {
        let mut unchanged = None;
        let updated = self
            .mutate(|s| {
                let record = s.records.get_mut(id)?;
                let mut metadata = record.metadata.clone();
                if !metadata.merge(&patch) {
                    unchanged = Some(record.clone());
                    return None;
                }
                record.metadata = metadata;
                record.touch();
                Some((WriteOp::Save(record.clone()), record.clone()))
            })
            .await?;
        Ok(updated.or(unchanged))
    }

    /// Replace a record's primary text.
    pub async fn update_content(
        &self,
        id: &str,
        content: impl Into<String>,
    ) -> Result<Option<Record>, DailyError> {
        let content = content.into();
        self.mutate(|s| {
            let record = s.records.get_mut(id)?;
            record.content = content;
            record.touch();
            Some((WriteOp::Save(record.clone()), record.clone()))
        })
        .await
    }

    /// Move a record to `position`, typically computed with
    /// [`crate::position::allocate`] from its new neighbors. Like
    /// [`Self::create`], a colliding position is accepted.
    pub async fn reorder(&self, id: &str, position: f64) -> Result<Option<Record>, DailyError> {
        self.mutate(|s| {
            let record = s.records.get_mut(id)?;
            record.order_position = position;
            record.touch();
            Some((WriteOp::Save(record.clone()), record.clone()))
        })
        .await
    }

    /// Delete a record. Returns false when the record is not in memory.
    pub async fn delete(&self, id: &str) -> Result<bool, DailyError> {
        let removed = self
            .mutate(|s| {
                s.records.remove(id)?;
                Some((WriteOp::Delete(id.to_string()), ()))
            })
            .await?;
        Ok(removed.is_some())
    }

    /// Clear the error flag after the UI has shown it.
    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Drop all in-memory records and return to the unloaded state. Loads
    /// and failed writes still in the queue leave the cleared state alone.
    pub fn dispose(&self) {
        self.state.send_modify(|s| {
            *s = DailySnapshot {
                generation: s.generation.wrapping_add(1),
                ..DailySnapshot::new(self.date)
            };
        });
    }

    /// Apply `change` under the state lock and queue its write in the same
    /// step. `change` returns None for a no-op, in which case nothing is
    /// published or written.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut DailySnapshot) -> Option<(WriteOp, T)>,
    ) -> Result<Option<T>, DailyError> {
        let mut queued = None;
        let mut writer_closed = false;

        self.state.send_if_modified(|s| {
            let previous = s.clone();
            let Some((op, value)) = change(s) else {
                return false;
            };
            let (reply, rx) = oneshot::channel();
            match self.jobs.send(Job::Write {
                op,
                previous: previous.clone(),
                reply,
            }) {
                Ok(()) => {
                    queued = Some((rx, value));
                    true
                }
                Err(_) => {
                    *s = previous;
                    writer_closed = true;
                    false
                }
            }
        });

        if writer_closed {
            return Err(DailyError::WriterClosed);
        }
        match queued {
            Some((rx, value)) => {
                rx.await.map_err(|_| DailyError::WriterClosed)??;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Background task draining a cache's job queue one job at a time.
struct DayWriter {
    date: NaiveDate,
    repo: Arc<dyn RecordRepository>,
    state: Arc<watch::Sender<DailySnapshot>>,
    rx: mpsc::UnboundedReceiver<Job>,
}

impl DayWriter {
    async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            match job {
                Job::Load { base, reply } => {
                    let result = self.load(base).await;
                    // Ignore send errors: the caller may have dropped its receiver.
                    let _ = reply.send(result);
                }
                Job::Write {
                    op,
                    previous,
                    reply,
                } => {
                    let result = self.write(op, previous).await;
                    let _ = reply.send(result);
                }
            }
        }
        tracing::debug!(date = %self.date, "day cache writer stopped");
    }

    async fn load(&self, base: DailySnapshot) -> Result<(), DailyError> {
        let date = self.date;
        let fetched = async {
            let latest = self.repo.latest_event_id().await?;
            if base.status == LoadStatus::Loaded && base.last_event_id.is_some() && base.last_event_id == latest {
                return Ok((latest, None));
            }
            let records = self.repo.get_records_for_date(date).await?;
            Ok::<_, RepositoryError>((latest, Some(records)))
        }
        .await;

        match fetched {
            Ok((latest, None)) => {
                tracing::debug!(%date, "day unchanged since last load, skipping scan");
                self.state.send_if_modified(|s| {
                    if s.generation != base.generation {
                        return false;
                    }
                    s.status = LoadStatus::Loaded;
                    s.last_event_id = latest;
                    s.error = None;
                    true
                });
                Ok(())
            }
            Ok((latest, Some(records))) => {
                tracing::debug!(%date, count = records.len(), "loaded day");
                let fetched: BTreeMap<String, Record> =
                    records.into_iter().map(|r| (r.id.clone(), r)).collect();
                self.state.send_if_modified(|s| {
                    if s.generation != base.generation {
                        return false;
                    }
                    s.records = rebase(fetched, &base.records, &s.records);
                    s.status = LoadStatus::Loaded;
                    s.last_event_id = latest;
                    s.error = None;
                    true
                });
                Ok(())
            }
            Err(source) => {
                tracing::warn!(%date, error = %source, "failed to load day");
                let message = source.to_string();
                self.state.send_if_modified(|s| {
                    if s.generation != base.generation {
                        return false;
                    }
                    s.status = LoadStatus::Loaded;
                    s.error = Some(message);
                    true
                });
                Err(DailyError::Load { date, source })
            }
        }
    }

    async fn write(&self, op: WriteOp, previous: DailySnapshot) -> Result<(), DailyError> {
        let record_id = op.record_id().to_string();
        let result = match op {
            WriteOp::Save(record) => self.repo.save_record(record).await,
            WriteOp::Delete(id) => self.repo.delete_record(&id).await.map(|_| ()),
        };

        match result {
            Ok(()) => Ok(()),
            Err(source) => {
                tracing::warn!(
                    date = %self.date,
                    record_id = %record_id,
                    error = %source,
                    "write failed, rolling back day state"
                );
                let message = source.to_string();
                self.state.send_if_modified(|s| {
                    if s.generation != previous.generation {
                        return false;
                    }
                    *s = DailySnapshot {
                        error: Some(message),
                        ..previous
                    };
                    true
                });
                Err(DailyError::Persist { record_id, source })
            }
        }
    }
}

/// Carry edits made between `base` and `current` over onto `fetched`.
fn rebase(
    mut fetched: BTreeMap<String, Record>,
    base: &BTreeMap<String, Record>,
    current: &BTreeMap<String, Record>,
) -> BTreeMap<String, Record> {
    for (id, record) in current {
        if base.get(id) != Some(record) {
            fetched.insert(id.clone(), record.clone());
        }
    }
    for id in base.keys() {
        if !current.contains_key(id) {
            fetched.remove(id);
        }
    }
    fetched
}
