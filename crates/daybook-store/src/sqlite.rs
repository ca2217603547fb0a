// ABOUTME: SQLite record store: the records projection, the append-only events log, and text search.
// ABOUTME: Each mutation writes its projection row and its log entry in one transaction.

use std::path::Path;

use chrono::NaiveDate;
use daybook_core::event::{Event, EventType};
use daybook_core::record::{
    RawRecord, Record, RecordError, format_date, from_millis, now_millis,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::schema::{migrate, open_connection};

/// Queries at least this many characters long go through the trigram index;
/// shorter ones fall back to a scan because trigrams cannot match them.
const MIN_INDEXED_QUERY_CHARS: usize = 3;

const RECORD_COLUMNS: &str =
    "r.id, r.date, r.type, r.content, r.metadata, r.order_position, r.created_at, r.updated_at";

/// A row of the records table before decoding.
#[derive(Debug, Clone)]
struct RecordRow {
    id: String,
    date: String,
    record_type: String,
    content: String,
    metadata: String,
    order_position: f64,
    created_at: i64,
    updated_at: i64,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            record_type: row.get(2)?,
            content: row.get(3)?,
            metadata: row.get(4)?,
            order_position: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// The generic shape, without interpreting the type or metadata keys.
    fn into_raw(self) -> Result<RawRecord, StoreError> {
        let metadata: Map<String, Value> =
            serde_json::from_str(&self.metadata).map_err(|e| StoreError::Decode {
                id: self.id.clone(),
                source: RecordError::InvalidMetadata {
                    key: "metadata".to_string(),
                    reason: e.to_string(),
                },
            })?;
        Ok(RawRecord {
            id: self.id,
            date: self.date,
            record_type: self.record_type,
            content: self.content,
            metadata,
            order_position: self.order_position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn into_record(self) -> Result<Record, StoreError> {
        let id = self.id.clone();
        Record::try_from(self.into_raw()?).map_err(|source| StoreError::Decode { id, source })
    }
}

/// A row of the events table before decoding.
#[derive(Debug, Clone)]
struct EventRow {
    event_id: i64,
    event_type: String,
    record_id: String,
    payload: String,
    timestamp: i64,
    device_id: Option<String>,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            record_id: row.get(2)?,
            payload: row.get(3)?,
            timestamp: row.get(4)?,
            device_id: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<Event, StoreError> {
        let event_id = self.event_id;
        let corrupt = |source| StoreError::CorruptEvent { event_id, source };

        let event_type = EventType::parse(&self.event_type).map_err(corrupt)?;
        let raw: RawRecord = serde_json::from_str(&self.payload)?;
        let payload = Record::try_from(raw).map_err(corrupt)?;
        Ok(Event {
            event_id,
            event_type,
            record_id: self.record_id,
            payload,
            timestamp: from_millis(self.timestamp).map_err(corrupt)?,
            device_id: self.device_id,
        })
    }
}

/// The only writer of the database file. Not thread-safe by itself; the
/// writer thread in [`crate::worker`] owns it exclusively.
pub struct RecordStore {
    conn: Connection,
    device_id: Option<String>,
}

impl RecordStore {
    /// Open or create a store file and migrate it to the current schema.
    pub fn open(path: &Path, device_id: Option<String>) -> Result<Self, StoreError> {
        let mut conn = open_connection(Some(path))?;
        migrate(&mut conn)?;
        tracing::info!(path = %path.display(), "opened record store");
        Ok(Self { conn, device_id })
    }

    /// Open a private, migrated in-memory store.
    pub fn open_in_memory(device_id: Option<String>) -> Result<Self, StoreError> {
        let mut conn = open_connection(None)?;
        migrate(&mut conn)?;
        Ok(Self { conn, device_id })
    }

    /// Upsert the record and append a `saved` event. `created_at` of an
    /// existing row is never changed.
    pub fn save(&mut self, record: &Record) -> Result<(), StoreError> {
        let raw = RawRecord::from(record.clone());
        let metadata = serde_json::to_string(&raw.metadata)?;
        let payload = serde_json::to_string(&raw)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO records (id, date, type, content, metadata, order_position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                type = excluded.type,
                content = excluded.content,
                metadata = excluded.metadata,
                order_position = excluded.order_position,
                updated_at = excluded.updated_at",
            params![
                raw.id,
                raw.date,
                raw.record_type,
                raw.content,
                metadata,
                raw.order_position,
                raw.created_at,
                raw.updated_at,
            ],
        )?;
        append_event(&tx, EventType::Saved, &raw.id, &payload, self.device_id.as_deref())?;
        tx.commit()?;

        tracing::debug!(record_id = %raw.id, date = %raw.date, "saved record");
        Ok(())
    }

    /// Remove a record, logging a `deleted` event whose payload is the row as
    /// it was. Returns false, writing nothing, when the id is absent.
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let row = tx
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1"),
                params![id],
                RecordRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(false);
        };

        let payload = serde_json::to_string(&row.into_raw()?)?;
        append_event(&tx, EventType::Deleted, id, &payload, self.device_id.as_deref())?;
        tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        tx.commit()?;

        tracing::debug!(record_id = %id, "deleted record");
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1"),
                params![id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    /// All records of a day, ascending by position. One undecodable row fails
    /// the whole load.
    pub fn get_for_date(&self, date: NaiveDate) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records r
             WHERE r.date = ?1
             ORDER BY r.order_position ASC, r.id ASC"
        ))?;
        let rows = stmt.query_map(params![format_date(date)], RecordRow::from_row)?;
        decode_rows(rows)
    }

    /// Substring search over content within an optional inclusive date
    /// range. Newest day first, ascending position within a day. An empty
    /// query matches nothing.
    ///
    /// Matching ignores case, Unicode included, on both paths: the trigram
    /// tokenizer folds case itself and the short-query scan compares
    /// lowercased text.
    pub fn search(
        &self,
        query: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Record>, StoreError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let start = start.map(format_date);
        let end = end.map(format_date);

        if query.chars().count() >= MIN_INDEXED_QUERY_CHARS {
            let phrase = format!("\"{}\"", query.replace('"', "\"\""));
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records_fts
                 JOIN records r ON r.rowid = records_fts.rowid
                 WHERE records_fts MATCH ?1
                   AND (?2 IS NULL OR r.date >= ?2)
                   AND (?3 IS NULL OR r.date <= ?3)
                 ORDER BY r.date DESC, r.order_position ASC"
            ))?;
            let rows = stmt.query_map(params![phrase, start, end], RecordRow::from_row)?;
            decode_rows(rows)
        } else {
            let needle = query.to_lowercase();
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records r
                 WHERE (?1 IS NULL OR r.date >= ?1)
                   AND (?2 IS NULL OR r.date <= ?2)
                 ORDER BY r.date DESC, r.order_position ASC"
            ))?;
            let rows = stmt
                .query_map(params![start, end], RecordRow::from_row)?
                .filter(|row| match row {
                    Ok(row) => row.content.to_lowercase().contains(&needle),
                    Err(_) => true,
                });
            decode_rows(rows)
        }
    }

    pub fn latest_event_id(&self) -> Result<Option<i64>, StoreError> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT MAX(event_id) FROM events", [], |row| row.get(0))?;
        Ok(id)
    }

    /// The most recent `limit` events, newest first.
    pub fn events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT event_id, event_type, record_id, payload, timestamp, device_id
             FROM events ORDER BY event_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], EventRow::from_row)?;
        decode_events(rows)
    }

    /// Full history of one record, oldest first.
    pub fn events_for_record(&self, id: &str) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, event_type, record_id, payload, timestamp, device_id
             FROM events WHERE record_id = ?1 ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![id], EventRow::from_row)?;
        decode_events(rows)
    }

    /// Close the connection, flushing the WAL.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}

fn append_event(
    tx: &Transaction<'_>,
    event_type: EventType,
    record_id: &str,
    payload: &str,
    device_id: Option<&str>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO events (event_type, record_id, payload, timestamp, device_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event_type.as_str(),
            record_id,
            payload,
            now_millis().timestamp_millis(),
            device_id,
        ],
    )?;
    Ok(())
}

fn decode_rows(
    rows: impl Iterator<Item = rusqlite::Result<RecordRow>>,
) -> Result<Vec<Record>, StoreError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

fn decode_events(
    rows: impl Iterator<Item = rusqlite::Result<EventRow>>,
) -> Result<Vec<Event>, StoreError> {
    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daybook_core::habit::HabitMetadata;
    use daybook_core::record::{HeadingLevel, Metadata, parse_date};

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn store() -> RecordStore {
        RecordStore::open_in_memory(Some("test-device".to_string())).unwrap()
    }

    fn text(date: &str, content: &str, position: f64) -> Record {
        Record::new(day(date), Metadata::Text, content, position)
    }

    fn contents(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.content.as_str()).collect()
    }

    #[test]
    fn save_then_get_for_date_round_trips_every_field() {
        let mut store = store();
        let mut habit = HabitMetadata::new("Meditate");
        habit.toggle(day("2026-02-01"));
        let records = vec![
            Record::new(day("2026-02-01"), Metadata::Heading { level: HeadingLevel::H2 }, "Morning", 1.0),
            Record::new(day("2026-02-01"), Metadata::Todo { checked: true, indent_level: 1 }, "buy milk", 2.0),
            Record::new(day("2026-02-01"), Metadata::Habit(habit), "", 3.0),
        ];
        for record in &records {
            store.save(record).unwrap();
        }

        let loaded = store.get_for_date(day("2026-02-01")).unwrap();
        assert_eq!(loaded, records);
        assert!(store.get_for_date(day("2026-02-02")).unwrap().is_empty());
    }

    #[test]
    fn records_come_back_in_position_order() {
        let mut store = store();
        store.save(&text("2026-02-01", "third", 3.0)).unwrap();
        store.save(&text("2026-02-01", "first", 0.5)).unwrap();
        store.save(&text("2026-02-01", "second", 1.0)).unwrap();

        let loaded = store.get_for_date(day("2026-02-01")).unwrap();
        assert_eq!(contents(&loaded), vec!["first", "second", "third"]);
    }

    #[test]
    fn upsert_keeps_created_at_and_logs_each_save() {
        let mut store = store();
        let record = text("2026-02-01", "draft", 1.0);
        store.save(&record).unwrap();

        let mut edited = record.clone();
        edited.content = "final".to_string();
        edited.created_at = from_millis(record.created_at.timestamp_millis() + 60_000).unwrap();
        edited.touch();
        store.save(&edited).unwrap();

        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.content, "final");
        assert_eq!(stored.created_at, record.created_at);

        let history = store.events_for_record(&record.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.event_type == EventType::Saved));
        assert_eq!(history[0].payload.content, "draft");
        assert_eq!(history[1].payload.content, "final");
        assert_eq!(history[1].device_id.as_deref(), Some("test-device"));
        assert!(history[0].event_id < history[1].event_id);
    }

    #[test]
    fn search_orders_newest_day_first_then_by_position() {
        let mut store = store();
        store.save(&text("2026-01-10", "meeting with Sam", 2.0)).unwrap();
        store.save(&text("2026-01-10", "prep for meeting", 1.0)).unwrap();
        store.save(&text("2026-01-12", "Meeting recap", 5.0)).unwrap();
        store.save(&text("2026-01-11", "gym", 1.0)).unwrap();

        let hits = store.search("meeting", None, None).unwrap();
        assert_eq!(
            contents(&hits),
            vec!["Meeting recap", "prep for meeting", "meeting with Sam"]
        );
    }

    #[test]
    fn search_honours_inclusive_date_bounds() {
        let mut store = store();
        for date in ["2026-01-10", "2026-01-11", "2026-01-12"] {
            store.save(&text(date, &format!("log {date}"), 1.0)).unwrap();
        }

        let hits = store
            .search("log", Some(day("2026-01-11")), Some(day("2026-01-12")))
            .unwrap();
        let dates: Vec<NaiveDate> = hits.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day("2026-01-12"), day("2026-01-11")]);

        let hits = store.search("log", None, Some(day("2026-01-10"))).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn search_matches_inside_words_and_short_queries() {
        let mut store = store();
        store.save(&text("2026-01-10", "unbelievable", 1.0)).unwrap();
        store.save(&text("2026-01-10", "100% done", 2.0)).unwrap();

        assert_eq!(store.search("liev", None, None).unwrap().len(), 1);
        assert_eq!(store.search("ab", None, None).unwrap().len(), 1);
        assert_eq!(contents(&store.search("%", None, None).unwrap()), vec!["100% done"]);
        assert!(store.search("", None, None).unwrap().is_empty());
        assert!(store.search("\"quoted\"", None, None).unwrap().is_empty());
    }

    #[test]
    fn search_folds_case_the_same_for_short_and_long_queries() {
        let mut store = store();
        store.save(&text("2026-01-10", "Éclair recipe", 1.0)).unwrap();
        store.save(&text("2026-01-10", "MILK", 2.0)).unwrap();

        assert_eq!(contents(&store.search("éc", None, None).unwrap()), vec!["Éclair recipe"]);
        assert_eq!(contents(&store.search("écl", None, None).unwrap()), vec!["Éclair recipe"]);
        assert_eq!(contents(&store.search("mi", None, None).unwrap()), vec!["MILK"]);
        assert_eq!(contents(&store.search("milk", None, None).unwrap()), vec!["MILK"]);
    }

    #[test]
    fn search_never_sees_stale_content() {
        let mut store = store();
        let mut record = text("2026-01-10", "alpha version", 1.0);
        store.save(&record).unwrap();
        record.content = "beta version".to_string();
        store.save(&record).unwrap();

        assert!(store.search("alpha", None, None).unwrap().is_empty());
        assert_eq!(store.search("beta", None, None).unwrap().len(), 1);

        store.delete(&record.id).unwrap();
        assert!(store.search("version", None, None).unwrap().is_empty());
    }

    #[test]
    fn delete_logs_the_pre_deletion_snapshot() {
        let mut store = store();
        let record = Record::new(
            day("2026-02-01"),
            Metadata::Todo { checked: true, indent_level: 2 },
            "call plumber",
            1.5,
        );
        store.save(&record).unwrap();

        assert!(store.delete(&record.id).unwrap());
        assert!(store.get(&record.id).unwrap().is_none());

        let last = store.events(1).unwrap().remove(0);
        assert_eq!(last.event_type, EventType::Deleted);
        assert_eq!(last.record_id, record.id);
        assert_eq!(last.payload, record);
    }

    #[test]
    fn delete_of_missing_id_writes_nothing() {
        let mut store = store();
        store.save(&text("2026-02-01", "keep", 1.0)).unwrap();
        let before = store.latest_event_id().unwrap();

        assert!(!store.delete("no-such-id").unwrap());
        assert_eq!(store.latest_event_id().unwrap(), before);
    }

    #[test]
    fn failed_event_append_rolls_back_the_projection() {
        let mut store = store();
        let record = text("2026-02-01", "original", 1.0);
        store.save(&record).unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_events BEFORE INSERT ON events BEGIN
                    SELECT RAISE(ABORT, 'event log unavailable');
                 END;",
            )
            .unwrap();

        let mut edited = record.clone();
        edited.content = "edited".to_string();
        assert!(store.save(&edited).is_err());
        assert!(store.save(&text("2026-02-01", "new", 2.0)).is_err());
        assert!(store.delete(&record.id).is_err());

        let rows = store.get_for_date(day("2026-02-01")).unwrap();
        assert_eq!(rows, vec![record]);
        assert!(store.search("edited", None, None).unwrap().is_empty());
    }

    #[test]
    fn unknown_stored_type_fails_the_day_load() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO records (id, date, type, content, metadata, order_position, created_at, updated_at)
                 VALUES ('bad', '2026-02-01', 'kanban', 'x', '{}', 1.0, 1, 1)",
                [],
            )
            .unwrap();

        let err = store.get_for_date(day("2026-02-01")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode { ref id, source: RecordError::UnknownType(_) } if id == "bad"
        ));
    }

    #[test]
    fn malformed_metadata_fails_the_load() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO records (id, date, type, content, metadata, order_position, created_at, updated_at)
                 VALUES ('bad', '2026-02-01', 'todo', 'x', '{\"checked\":\"yes\"}', 1.0, 1, 1)",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.get_for_date(day("2026-02-01")),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn legacy_event_rows_decode_through_aliases() {
        let store = store();
        store
            .conn
            .execute_batch(
                r#"
                INSERT INTO events (event_type, record_id, payload, timestamp)
                VALUES ('created', 'old', '{"id":"old","date":"2025-05-01","type":"checkbox","metadata":{"content":"legacy","checked":false},"orderPosition":1.0,"createdAt":1000,"updatedAt":1000}', 1000);
                INSERT INTO events (event_type, record_id, payload, timestamp)
                VALUES ('updated', 'old', '{"id":"old","date":"2025-05-01","type":"checkbox","content":"legacy","metadata":{"checked":true},"orderPosition":1.0,"createdAt":1000,"updatedAt":2000}', 2000);
                "#,
            )
            .unwrap();

        let history = store.events_for_record("old").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.event_type == EventType::Saved));
        assert_eq!(history[0].payload.content, "legacy");
        assert_eq!(
            history[1].payload.metadata,
            Metadata::Todo { checked: true, indent_level: 0 }
        );
        assert_eq!(history[0].device_id, None);
    }

    #[test]
    fn unknown_event_type_is_corruption() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO events (event_type, record_id, payload, timestamp) VALUES ('archived', 'x', '{}', 1)",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.events(10),
            Err(StoreError::CorruptEvent { source: RecordError::UnknownEventType(_), .. })
        ));
    }

    #[test]
    fn events_are_newest_first_and_limited() {
        let mut store = store();
        let a = text("2026-02-01", "a", 1.0);
        let b = text("2026-02-01", "b", 2.0);
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        store.delete(&a.id).unwrap();

        let events = store.events(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Deleted);
        assert_eq!(events[1].record_id, b.id);
        assert_eq!(store.latest_event_id().unwrap(), Some(events[0].event_id));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("daybook.db");
        let record = text("2026-02-01", "durable", 1.0);

        let mut store = RecordStore::open(&path, None).unwrap();
        store.save(&record).unwrap();
        store.close().unwrap();

        let store = RecordStore::open(&path, None).unwrap();
        assert_eq!(store.get(&record.id).unwrap(), Some(record));
        assert_eq!(store.latest_event_id().unwrap(), Some(1));
    }
}
