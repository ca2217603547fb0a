// ABOUTME: Persistence layer for daybook, owning the SQLite file through a single writer thread.
// ABOUTME: Provides schema migrations, the record store with its event log and text index, and the store handle.

pub mod database;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod worker;

pub use database::{Database, DatabaseConfig, StoreLocation};
pub use error::StoreError;
pub use schema::{MigrationReport, SCHEMA_VERSION, SchemaError};
pub use sqlite::RecordStore;
pub use worker::StoreHandle;
