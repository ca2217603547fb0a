// ABOUTME: Defines the Record struct, the closed RecordType enumeration, and typed per-type Metadata.
// ABOUTME: Records serialize to the generic on-disk shape: a type string plus a key-value metadata object.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use ulid::Ulid;

use crate::habit::{HabitFrequency, HabitMetadata, normalize_completions};

/// Format of the calendar-day partition key.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const KEY_CHECKED: &str = "checked";
const KEY_LEVEL: &str = "level";
const KEY_INDENT_LEVEL: &str = "indentLevel";
const KEY_HABIT_NAME: &str = "habitName";
const KEY_FREQUENCY: &str = "frequency";
const KEY_COMPLETIONS: &str = "completions";
const KEY_ARCHIVED: &str = "archived";
const KEY_LEGACY_CONTENT: &str = "content";

/// Errors raised while decoding stored records and events. These are
/// data-integrity failures and are never defaulted away.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("unknown record type: {0}")]
    UnknownType(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid date key: {0}")]
    InvalidDate(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("invalid metadata field '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },
}

/// The closed set of content item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Text,
    Heading,
    Todo,
    BulletList,
    Habit,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Text,
        RecordType::Heading,
        RecordType::Todo,
        RecordType::BulletList,
        RecordType::Habit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Text => "text",
            RecordType::Heading => "heading",
            RecordType::Todo => "todo",
            RecordType::BulletList => "bulletList",
            RecordType::Habit => "habit",
        }
    }

    /// Parse a stored type name. Names retired by the schema v3 rename are
    /// still accepted so old event payloads decode; anything else is corrupt.
    pub fn parse(name: &str) -> Result<Self, RecordError> {
        match name {
            "text" => Ok(RecordType::Text),
            "heading" => Ok(RecordType::Heading),
            "todo" => Ok(RecordType::Todo),
            "bulletList" => Ok(RecordType::BulletList),
            "habit" => Ok(RecordType::Habit),
            "checkbox" => Ok(RecordType::Todo),
            "bullet" => Ok(RecordType::BulletList),
            other => Err(RecordError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Heading sizes supported by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadingLevel {
    #[default]
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    pub fn from_level(level: u64) -> Option<Self> {
        match level {
            1 => Some(HeadingLevel::H1),
            2 => Some(HeadingLevel::H2),
            3 => Some(HeadingLevel::H3),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            HeadingLevel::H1 => 1,
            HeadingLevel::H2 => 2,
            HeadingLevel::H3 => 3,
        }
    }
}

/// Type-specific fields of a record. The variant determines the record's
/// type, so a record can never carry another type's keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    Text,
    Heading { level: HeadingLevel },
    Todo { checked: bool, indent_level: u32 },
    BulletList { indent_level: u32 },
    Habit(HabitMetadata),
}

impl Metadata {
    /// Metadata for a freshly created record of the given type.
    pub fn default_for(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Text => Metadata::Text,
            RecordType::Heading => Metadata::Heading {
                level: HeadingLevel::default(),
            },
            RecordType::Todo => Metadata::Todo {
                checked: false,
                indent_level: 0,
            },
            RecordType::BulletList => Metadata::BulletList { indent_level: 0 },
            RecordType::Habit => Metadata::Habit(HabitMetadata::default()),
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Metadata::Text => RecordType::Text,
            Metadata::Heading { .. } => RecordType::Heading,
            Metadata::Todo { .. } => RecordType::Todo,
            Metadata::BulletList { .. } => RecordType::BulletList,
            Metadata::Habit(_) => RecordType::Habit,
        }
    }

    /// Map this variant onto the generic key-value representation stored on disk.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Metadata::Text => {}
            Metadata::Heading { level } => {
                map.insert(KEY_LEVEL.to_string(), Value::from(level.level()));
            }
            Metadata::Todo {
                checked,
                indent_level,
            } => {
                map.insert(KEY_CHECKED.to_string(), Value::Bool(*checked));
                map.insert(KEY_INDENT_LEVEL.to_string(), Value::from(*indent_level));
            }
            Metadata::BulletList { indent_level } => {
                map.insert(KEY_INDENT_LEVEL.to_string(), Value::from(*indent_level));
            }
            Metadata::Habit(habit) => {
                map.insert(KEY_HABIT_NAME.to_string(), Value::String(habit.name.clone()));
                map.insert(
                    KEY_FREQUENCY.to_string(),
                    Value::String(habit.frequency.as_str().to_string()),
                );
                map.insert(
                    KEY_COMPLETIONS.to_string(),
                    Value::Array(
                        habit
                            .completions
                            .iter()
                            .map(|d| Value::String(format_date(*d)))
                            .collect(),
                    ),
                );
                map.insert(KEY_ARCHIVED.to_string(), Value::Bool(habit.archived));
            }
        }
        map
    }

    /// Decode the generic key-value representation for the given type.
    /// Missing keys take their defaults; keys of the wrong shape are errors.
    /// Keys that do not belong to the type are ignored.
    pub fn from_map(record_type: RecordType, map: &Map<String, Value>) -> Result<Self, RecordError> {
        let metadata = match record_type {
            RecordType::Text => Metadata::Text,
            RecordType::Heading => {
                let level = match map.get(KEY_LEVEL) {
                    None | Some(Value::Null) => HeadingLevel::default(),
                    Some(value) => value
                        .as_u64()
                        .and_then(HeadingLevel::from_level)
                        .ok_or_else(|| invalid(KEY_LEVEL, format!("expected 1, 2 or 3, got {value}")))?,
                };
                Metadata::Heading { level }
            }
            RecordType::Todo => Metadata::Todo {
                checked: bool_field(map, KEY_CHECKED)?,
                indent_level: u32_field(map, KEY_INDENT_LEVEL)?,
            },
            RecordType::BulletList => Metadata::BulletList {
                indent_level: u32_field(map, KEY_INDENT_LEVEL)?,
            },
            RecordType::Habit => {
                let name = match map.get(KEY_HABIT_NAME) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => return Err(invalid(KEY_HABIT_NAME, format!("expected string, got {other}"))),
                };
                let frequency = match map.get(KEY_FREQUENCY) {
                    None | Some(Value::Null) => HabitFrequency::default(),
                    Some(Value::String(s)) => HabitFrequency::parse(s)
                        .ok_or_else(|| invalid(KEY_FREQUENCY, format!("unknown frequency '{s}'")))?,
                    Some(other) => return Err(invalid(KEY_FREQUENCY, format!("expected string, got {other}"))),
                };
                let completions = match map.get(KEY_COMPLETIONS) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => {
                        let mut dates = Vec::with_capacity(items.len());
                        for item in items {
                            let s = item
                                .as_str()
                                .ok_or_else(|| invalid(KEY_COMPLETIONS, format!("expected date string, got {item}")))?;
                            dates.push(parse_date(s)?);
                        }
                        normalize_completions(&mut dates);
                        dates
                    }
                    Some(other) => return Err(invalid(KEY_COMPLETIONS, format!("expected array, got {other}"))),
                };
                Metadata::Habit(HabitMetadata {
                    name,
                    frequency,
                    completions,
                    archived: bool_field(map, KEY_ARCHIVED)?,
                })
            }
        };
        Ok(metadata)
    }

    /// Merge the fields of `patch` that belong to this variant. Returns true
    /// when at least one applicable field was present.
    pub fn merge(&mut self, patch: &MetadataPatch) -> bool {
        let mut applied = false;
        match self {
            Metadata::Text => {}
            Metadata::Heading { level } => {
                if let Some(l) = patch.level {
                    *level = l;
                    applied = true;
                }
            }
            Metadata::Todo {
                checked,
                indent_level,
            } => {
                if let Some(c) = patch.checked {
                    *checked = c;
                    applied = true;
                }
                if let Some(i) = patch.indent_level {
                    *indent_level = i;
                    applied = true;
                }
            }
            Metadata::BulletList { indent_level } => {
                if let Some(i) = patch.indent_level {
                    *indent_level = i;
                    applied = true;
                }
            }
            Metadata::Habit(habit) => {
                if let Some(name) = &patch.habit_name {
                    habit.name = name.clone();
                    applied = true;
                }
                if let Some(f) = patch.frequency {
                    habit.frequency = f;
                    applied = true;
                }
                if let Some(completions) = &patch.completions {
                    habit.completions = completions.clone();
                    normalize_completions(&mut habit.completions);
                    applied = true;
                }
                if let Some(a) = patch.archived {
                    habit.archived = a;
                    applied = true;
                }
            }
        }
        applied
    }
}

/// A partial metadata change. Only fields belonging to the target record's
/// type are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub checked: Option<bool>,
    pub level: Option<HeadingLevel>,
    pub indent_level: Option<u32>,
    pub habit_name: Option<String>,
    pub frequency: Option<HabitFrequency>,
    pub completions: Option<Vec<NaiveDate>>,
    pub archived: Option<bool>,
}

impl MetadataPatch {
    pub fn checked(checked: bool) -> Self {
        Self {
            checked: Some(checked),
            ..Self::default()
        }
    }

    pub fn indent_level(indent_level: u32) -> Self {
        Self {
            indent_level: Some(indent_level),
            ..Self::default()
        }
    }

    pub fn completions(completions: Vec<NaiveDate>) -> Self {
        Self {
            completions: Some(completions),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single typed content item on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord", into = "RawRecord")]
pub struct Record {
    pub id: String,
    pub date: NaiveDate,
    pub content: String,
    pub metadata: Metadata,
    pub order_position: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a record with a fresh ULID and both timestamps set to now.
    pub fn new(date: NaiveDate, metadata: Metadata, content: impl Into<String>, order_position: f64) -> Self {
        let now = now_millis();
        Self {
            id: Ulid::new().to_string(),
            date,
            content: content.into(),
            metadata,
            order_position,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.metadata.record_type()
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// The generic representation of a record: the JSON event payload shape and
/// the column values of the projection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: String,
    pub date: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub order_position: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Record> for RawRecord {
    fn from(record: Record) -> Self {
        Self {
            record_type: record.record_type().as_str().to_string(),
            metadata: record.metadata.to_map(),
            date: format_date(record.date),
            id: record.id,
            content: record.content,
            order_position: record.order_position,
            created_at: record.created_at.timestamp_millis(),
            updated_at: record.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<RawRecord> for Record {
    type Error = RecordError;

    fn try_from(mut raw: RawRecord) -> Result<Self, Self::Error> {
        // Payloads logged before schema v2 kept the text under metadata.content.
        if let Some(Value::String(legacy)) = raw.metadata.remove(KEY_LEGACY_CONTENT) {
            if raw.content.is_empty() {
                raw.content = legacy;
            }
        }
        let record_type = RecordType::parse(&raw.record_type)?;
        Ok(Self {
            date: parse_date(&raw.date)?,
            metadata: Metadata::from_map(record_type, &raw.metadata)?,
            created_at: from_millis(raw.created_at)?,
            updated_at: from_millis(raw.updated_at)?,
            id: raw.id,
            content: raw.content,
            order_position: raw.order_position,
        })
    }
}

/// The current time truncated to the millisecond precision that is persisted.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, RecordError> {
    DateTime::from_timestamp_millis(millis).ok_or(RecordError::InvalidTimestamp(millis))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, RecordError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| RecordError::InvalidDate(s.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn invalid(key: &str, reason: String) -> RecordError {
    RecordError::InvalidMetadata {
        key: key.to_string(),
        reason,
    }
}

fn bool_field(map: &Map<String, Value>, key: &str) -> Result<bool, RecordError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(invalid(key, format!("expected boolean, got {other}"))),
    }
}

fn u32_field(map: &Map<String, Value>, key: &str) -> Result<u32, RecordError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid(key, format!("expected non-negative integer, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn record_type_accepts_retired_names() {
        assert_eq!(RecordType::parse("checkbox").unwrap(), RecordType::Todo);
        assert_eq!(RecordType::parse("bullet").unwrap(), RecordType::BulletList);
        assert_eq!(RecordType::parse("bulletList").unwrap(), RecordType::BulletList);
    }

    #[test]
    fn record_type_rejects_unknown_names() {
        let err = RecordType::parse("kanban").unwrap_err();
        assert_eq!(err, RecordError::UnknownType("kanban".to_string()));
    }

    #[test]
    fn record_type_names_round_trip() {
        for t in RecordType::ALL {
            assert_eq!(RecordType::parse(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn todo_metadata_maps_to_generic_keys() {
        let metadata = Metadata::Todo {
            checked: true,
            indent_level: 2,
        };
        let map = metadata.to_map();
        assert_eq!(map.get("checked"), Some(&json!(true)));
        assert_eq!(map.get("indentLevel"), Some(&json!(2)));
        assert_eq!(Metadata::from_map(RecordType::Todo, &map).unwrap(), metadata);
    }

    #[test]
    fn habit_metadata_decodes_and_sorts_completions() {
        let map = json!({
            "habitName": "Stretch",
            "frequency": "weekly",
            "completions": ["2026-01-12", "2026-01-10", "2026-01-12"],
            "archived": false
        });
        let metadata = Metadata::from_map(RecordType::Habit, map.as_object().unwrap()).unwrap();
        match metadata {
            Metadata::Habit(habit) => {
                assert_eq!(habit.name, "Stretch");
                assert_eq!(habit.frequency, HabitFrequency::Weekly);
                assert_eq!(habit.completions, vec![day("2026-01-10"), day("2026-01-12")]);
            }
            other => panic!("expected habit metadata, got {:?}", other),
        }
    }

    #[test]
    fn missing_keys_take_defaults() {
        let empty = Map::new();
        assert_eq!(
            Metadata::from_map(RecordType::Todo, &empty).unwrap(),
            Metadata::default_for(RecordType::Todo)
        );
        assert_eq!(
            Metadata::from_map(RecordType::Heading, &empty).unwrap(),
            Metadata::Heading {
                level: HeadingLevel::H1
            }
        );
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        let map = json!({ "checked": "yes" });
        let err = Metadata::from_map(RecordType::Todo, map.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidMetadata { ref key, .. } if key == "checked"));

        let map = json!({ "level": 7 });
        assert!(Metadata::from_map(RecordType::Heading, map.as_object().unwrap()).is_err());
    }

    #[test]
    fn merge_ignores_fields_of_other_types() {
        let mut metadata = Metadata::BulletList { indent_level: 0 };
        assert!(!metadata.merge(&MetadataPatch::checked(true)));
        assert_eq!(metadata, Metadata::BulletList { indent_level: 0 });

        assert!(metadata.merge(&MetadataPatch::indent_level(3)));
        assert_eq!(metadata, Metadata::BulletList { indent_level: 3 });
    }

    #[test]
    fn record_payload_uses_camel_case_wire_shape() {
        let record = Record::new(
            day("2026-02-01"),
            Metadata::Todo {
                checked: false,
                indent_level: 1,
            },
            "buy milk",
            1.0,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("todo"));
        assert_eq!(value["date"], json!("2026-02-01"));
        assert_eq!(value["orderPosition"], json!(1.0));
        assert_eq!(value["metadata"]["indentLevel"], json!(1));
        assert_eq!(value["createdAt"], json!(record.created_at.timestamp_millis()));

        let decoded: Record = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn payload_with_retired_type_decodes_to_current_type() {
        let value = json!({
            "id": "01HZZZZZZZZZZZZZZZZZZZZZZZ",
            "date": "2025-11-03",
            "type": "checkbox",
            "content": "old todo",
            "metadata": { "checked": true },
            "orderPosition": 2.0,
            "createdAt": 1_700_000_000_000i64,
            "updatedAt": 1_700_000_000_000i64
        });
        let record: Record = serde_json::from_value(value).unwrap();
        assert_eq!(record.record_type(), RecordType::Todo);
        assert_eq!(
            record.metadata,
            Metadata::Todo {
                checked: true,
                indent_level: 0
            }
        );
    }

    #[test]
    fn pre_content_column_payload_lifts_text_out_of_metadata() {
        let value = json!({
            "id": "01HYYYYYYYYYYYYYYYYYYYYYYY",
            "date": "2025-05-20",
            "type": "bullet",
            "metadata": { "content": "pack bags", "indentLevel": 2 },
            "orderPosition": 1.0,
            "createdAt": 1_690_000_000_000i64,
            "updatedAt": 1_690_000_000_000i64
        });
        let record: Record = serde_json::from_value(value).unwrap();
        assert_eq!(record.content, "pack bags");
        assert_eq!(record.metadata, Metadata::BulletList { indent_level: 2 });
    }

    #[test]
    fn payload_with_unknown_type_fails() {
        let value = json!({
            "id": "x",
            "date": "2025-11-03",
            "type": "sticker",
            "content": "",
            "metadata": {},
            "orderPosition": 2.0,
            "createdAt": 0,
            "updatedAt": 0
        });
        assert!(serde_json::from_value::<Record>(value).is_err());
    }

    #[test]
    fn now_millis_has_no_sub_millisecond_part() {
        let now = now_millis();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(from_millis(now.timestamp_millis()).unwrap(), now);
    }
}
