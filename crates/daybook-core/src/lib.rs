// ABOUTME: Core library for daybook, containing the record model, ordering keys, and in-memory day state.
// ABOUTME: Storage backends plug in through the RecordRepository trait defined here.

pub mod daily;
pub mod event;
pub mod habit;
pub mod position;
pub mod record;
pub mod registry;
pub mod repository;
pub mod testing;

pub use daily::{DailyError, DailySnapshot, DailyStateCache, LoadStatus};
pub use event::{Event, EventType};
pub use habit::{HabitFrequency, HabitMetadata, HabitStats};
pub use record::{HeadingLevel, Metadata, MetadataPatch, RawRecord, Record, RecordError, RecordType};
pub use registry::{DEFAULT_MAX_CACHES, StateRegistry};
pub use repository::{RecordRepository, RepositoryError};
