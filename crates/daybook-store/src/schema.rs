// ABOUTME: Versioned SQLite schema: connection setup, the schema_version marker, and stepwise migrations.
// ABOUTME: Steps 1-3 share one transaction; the text index step commits separately and is re-run if half-applied.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 4;

const VERSION_KEY: &str = "schema_version";

/// Errors that can occur while bringing a database to [`SCHEMA_VERSION`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("migration to version {version} failed: {source}")]
    Step {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database schema version {found} is newer than supported version {supported}")]
    TooNew { found: u32, supported: u32 },

    #[error("invalid schema version marker: {0:?}")]
    InvalidMarker(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// What a call to [`migrate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Open a connection with the pragmas every daybook connection uses. An
/// in-memory database is opened when `path` is None.
pub fn open_connection(path: Option<&Path>) -> Result<Connection, SchemaError> {
    let conn = match path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Read the persisted version marker. A database without a marker table is
/// version 0.
pub fn schema_version(conn: &Connection) -> Result<u32, SchemaError> {
    let has_meta = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'")?
        .exists([])?;
    if !has_meta {
        return Ok(0);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v.parse::<u32>().map_err(|_| SchemaError::InvalidMarker(v)),
    }
}

/// Bring the database to [`SCHEMA_VERSION`]. Calling this on a database that
/// is already current changes nothing.
pub fn migrate(conn: &mut Connection) -> Result<MigrationReport, SchemaError> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Apply migrations up to and including `target`.
pub(crate) fn migrate_to(conn: &mut Connection, target: u32) -> Result<MigrationReport, SchemaError> {
    let from = schema_version(conn)?;
    if from > SCHEMA_VERSION {
        return Err(SchemaError::TooNew {
            found: from,
            supported: SCHEMA_VERSION,
        });
    }

    let mut applied = Vec::new();

    if from < 3 && target >= 1 {
        let tx = conn.transaction()?;
        let mut version = from;
        let steps: [(u32, StepFn); 3] = [(1, step_v1), (2, step_v2), (3, step_v3)];
        for (step_version, step) in steps {
            if version < step_version && step_version <= target {
                run_step(&tx, step_version, step)?;
                applied.push(step_version);
                version = step_version;
            }
        }
        tx.commit()?;
    }

    // FTS5 DDL goes in its own transaction after the schema changes above
    // are committed. A crash here leaves marker 3 with the index possibly
    // created; every statement below is safe to repeat.
    if schema_version(conn)? == 3 && target >= 4 {
        let tx = conn.transaction()?;
        run_step(&tx, 4, step_v4)?;
        tx.commit()?;
        applied.push(4);
    }

    let to = schema_version(conn)?;
    if applied.is_empty() {
        tracing::debug!(version = to, "schema is current");
    } else {
        tracing::info!(from, to, ?applied, "migrated schema");
    }
    Ok(MigrationReport { from, to, applied })
}

type StepFn = fn(&Transaction<'_>) -> rusqlite::Result<()>;

fn run_step(tx: &Transaction<'_>, version: u32, step: StepFn) -> Result<(), SchemaError> {
    tracing::info!(version, "applying schema migration");
    step(tx)
        .and_then(|()| set_version(tx, version))
        .map_err(|source| SchemaError::Step { version, source })
}

fn set_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}

/// Base tables. Text lived in `metadata.content` at this version.
fn step_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            order_position REAL NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_date ON records(date);

        CREATE TABLE IF NOT EXISTS events (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            device_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_record_id ON events(record_id);",
    )
}

/// Move text out of the metadata object into its own column.
fn step_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !column_exists(tx, "records", "content")? {
        tx.execute_batch("ALTER TABLE records ADD COLUMN content TEXT NOT NULL DEFAULT '';")?;
    }
    let moved = tx.execute(
        "UPDATE records
         SET content = COALESCE(CAST(json_extract(metadata, '$.content') AS TEXT), ''),
             metadata = json_remove(metadata, '$.content')
         WHERE json_type(metadata, '$.content') IS NOT NULL",
        [],
    )?;
    tracing::info!(rows = moved, "extracted content column");
    Ok(())
}

/// Rename retired type names and index the per-day ordering.
fn step_v3(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    let renamed = tx.execute(
        "UPDATE records SET type = CASE type
            WHEN 'checkbox' THEN 'todo'
            WHEN 'bullet' THEN 'bulletList'
         END
         WHERE type IN ('checkbox', 'bullet')",
        [],
    )?;
    tracing::info!(rows = renamed, "renamed retired record types");
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_records_date_position ON records(date, order_position);",
    )
}

/// Trigram full-text index over `records.content`, kept in sync by triggers.
fn step_v4(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
            content,
            content='records',
            content_rowid='rowid',
            tokenize='trigram'
        );

        CREATE TRIGGER IF NOT EXISTS records_ai AFTER INSERT ON records BEGIN
            INSERT INTO records_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
        END;

        CREATE TRIGGER IF NOT EXISTS records_ad AFTER DELETE ON records BEGIN
            INSERT INTO records_fts(records_fts, rowid, content)
            VALUES ('delete', OLD.rowid, OLD.content);
        END;

        CREATE TRIGGER IF NOT EXISTS records_au AFTER UPDATE ON records BEGIN
            INSERT INTO records_fts(records_fts, rowid, content)
            VALUES ('delete', OLD.rowid, OLD.content);
            INSERT INTO records_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
        END;

        INSERT INTO records_fts(records_fts) VALUES ('rebuild');",
    )
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?
        .exists(params![table, column])
}
