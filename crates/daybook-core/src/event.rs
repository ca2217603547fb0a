// ABOUTME: Defines the append-only event log entry and its event type.
// ABOUTME: Every durable mutation appends one event carrying the full record snapshot.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::record::{Record, RecordError};

/// What happened to a record. Creation and update are one kind because
/// persistence is an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Saved,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Saved => "saved",
            EventType::Deleted => "deleted",
        }
    }

    /// Parse a stored event type. Logs written before schema v3 used
    /// `created` and `updated`; both decode as [`EventType::Saved`].
    pub fn parse(name: &str) -> Result<Self, RecordError> {
        match name {
            "saved" | "created" | "updated" => Ok(EventType::Saved),
            "deleted" => Ok(EventType::Deleted),
            other => Err(RecordError::UnknownEventType(other.to_string())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the event log. `event_id` is the autoincrement row id and is
/// monotonic in insertion order regardless of `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: i64,
    pub event_type: EventType,
    pub record_id: String,
    pub payload: Record,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
}
