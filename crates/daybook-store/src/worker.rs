// ABOUTME: Dedicated writer thread owning the RecordStore, driven by a request queue.
// ABOUTME: StoreHandle is the cloneable async front end and implements RecordRepository.

use std::thread;

use async_trait::async_trait;
use chrono::NaiveDate;
use daybook_core::event::Event;
use daybook_core::record::Record;
use daybook_core::repository::{RecordRepository, RepositoryError};
use tokio::sync::{mpsc, oneshot};

use crate::database::StoreLocation;
use crate::error::StoreError;
use crate::sqlite::RecordStore;

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// A job for the writer thread paired with the channel its answer goes to.
enum Request {
    Save {
        record: Record,
        reply: Reply<()>,
    },
    Delete {
        id: String,
        reply: Reply<bool>,
    },
    Get {
        id: String,
        reply: Reply<Option<Record>>,
    },
    ForDate {
        date: NaiveDate,
        reply: Reply<Vec<Record>>,
    },
    Search {
        query: String,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        reply: Reply<Vec<Record>>,
    },
    LatestEventId {
        reply: Reply<Option<i64>>,
    },
    Events {
        limit: usize,
        reply: Reply<Vec<Event>>,
    },
    EventsForRecord {
        id: String,
        reply: Reply<Vec<Event>>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Async handle to the writer thread. Clones share the one connection.
///
/// Requests run one at a time in submission order. A request that has been
/// submitted runs to completion even if the caller stops waiting for it.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl StoreHandle {
    /// Start the writer thread, opening and migrating the store on it.
    /// Resolves once the store is ready, or with the open/migration error.
    pub async fn spawn(location: StoreLocation, device_id: Option<String>) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name("daybook-store".to_string())
            .spawn(move || {
                let opened = match &location {
                    StoreLocation::File(path) => RecordStore::open(path, device_id),
                    StoreLocation::Memory => RecordStore::open_in_memory(device_id),
                };
                match opened {
                    Ok(store) => {
                        if ready_tx.send(Ok(())).is_ok() {
                            run(store, rx);
                        }
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })?;

        ready_rx.await.map_err(|_| StoreError::Closed)??;
        Ok(Self { tx })
    }

    pub async fn save(&self, record: Record) -> Result<(), StoreError> {
        self.call(|reply| Request::Save { record, reply }).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.call(|reply| Request::Delete { id, reply }).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let id = id.to_string();
        self.call(|reply| Request::Get { id, reply }).await
    }

    pub async fn records_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, StoreError> {
        self.call(|reply| Request::ForDate { date, reply }).await
    }

    pub async fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, StoreError> {
        let query = query.to_string();
        self.call(|reply| Request::Search {
            query,
            start,
            end,
            reply,
        })
        .await
    }

    pub async fn latest_event_id(&self) -> Result<Option<i64>, StoreError> {
        self.call(|reply| Request::LatestEventId { reply }).await
    }

    /// The most recent `limit` events, newest first.
    pub async fn events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        self.call(|reply| Request::Events { limit, reply }).await
    }

    pub async fn events_for_record(&self, id: &str) -> Result<Vec<Event>, StoreError> {
        let id = id.to_string();
        self.call(|reply| Request::EventsForRecord { id, reply }).await
    }

    /// Stop the writer thread after the requests already queued and close
    /// the connection. Later calls on any clone return [`StoreError::Closed`].
    pub async fn close(self) -> Result<(), StoreError> {
        self.call(|reply| Request::Close { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(request(reply))
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

fn run(mut store: RecordStore, mut rx: mpsc::UnboundedReceiver<Request>) {
    tracing::debug!("store writer started");
    // Ignore reply send errors: the caller may have dropped its receiver.
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Save { record, reply } => {
                let result = store.save(&record);
                if let Err(err) = &result {
                    tracing::warn!(record_id = %record.id, error = %err, "save failed");
                }
                let _ = reply.send(result);
            }
            Request::Delete { id, reply } => {
                let result = store.delete(&id);
                if let Err(err) = &result {
                    tracing::warn!(record_id = %id, error = %err, "delete failed");
                }
                let _ = reply.send(result);
            }
            Request::Get { id, reply } => {
                let _ = reply.send(store.get(&id));
            }
            Request::ForDate { date, reply } => {
                let _ = reply.send(store.get_for_date(date));
            }
            Request::Search {
                query,
                start,
                end,
                reply,
            } => {
                let _ = reply.send(store.search(&query, start, end));
            }
            Request::LatestEventId { reply } => {
                let _ = reply.send(store.latest_event_id());
            }
            Request::Events { limit, reply } => {
                let _ = reply.send(store.events(limit));
            }
            Request::EventsForRecord { id, reply } => {
                let _ = reply.send(store.events_for_record(&id));
            }
            Request::Close { reply } => {
                rx.close();
                let _ = reply.send(store.close());
                tracing::info!("record store closed");
                return;
            }
        }
    }

    // Every handle was dropped without an explicit close.
    if let Err(err) = store.close() {
        tracing::warn!(error = %err, "failed to close record store");
    }
}

#[async_trait]
impl RecordRepository for StoreHandle {
    async fn save_record(&self, record: Record) -> Result<(), RepositoryError> {
        Ok(self.save(record).await?)
    }

    async fn delete_record(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.delete(id).await?)
    }

    async fn get_records_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, RepositoryError> {
        Ok(self.records_for_date(date).await?)
    }

    async fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, RepositoryError> {
        Ok(StoreHandle::search(self, query, start, end).await?)
    }

    async fn latest_event_id(&self) -> Result<Option<i64>, RepositoryError> {
        Ok(StoreHandle::latest_event_id(self).await?)
    }
}
