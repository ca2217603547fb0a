// ABOUTME: Executes CLI subcommands against the state registry and the store handle.
// ABOUTME: Day edits go through a DailyStateCache; search and the event log read the store directly.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use daybook_core::daily::DailySnapshot;
use daybook_core::event::Event;
use daybook_core::habit::HabitMetadata;
use daybook_core::record::{HeadingLevel, Metadata, MetadataPatch, Record, RecordType};
use daybook_core::registry::StateRegistry;
use daybook_store::StoreHandle;

use crate::cli::{Command, Placement};

/// Run one command. `today` is the default day and the reference date for
/// habit statistics.
pub async fn run(
    command: Command,
    store: &StoreHandle,
    registry: &StateRegistry,
    today: NaiveDate,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Add {
            text,
            kind,
            level,
            day,
            place,
        } => {
            let date = day.or(today);
            let metadata = new_metadata(kind.into(), level, &text)?;
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let position = place_in(&cache.snapshot(), None, &place)?;
            let record = cache.create(metadata, text, position).await?;
            writeln!(out, "added {} to {}", record.id, date)?;
        }
        Command::List { day } => {
            let date = day.or(today);
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let snapshot = cache.snapshot();
            if snapshot.records.is_empty() {
                writeln!(out, "nothing on {date}")?;
            }
            for record in snapshot.ordered() {
                writeln!(out, "{}  {}", record.id, render(record, today))?;
            }
        }
        Command::Search { query, from, to } => {
            let hits = store.search(&query, from, to).await?;
            for record in &hits {
                writeln!(out, "{}  {}  {}", record.date, record.id, render(record, today))?;
            }
            writeln!(out, "{} match(es)", hits.len())?;
        }
        Command::Edit { id, text, day } => {
            let date = day.or(today);
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let id = resolve_id(&cache.snapshot(), &id)?;
            cache.update_content(&id, text).await?;
            writeln!(out, "updated {id}")?;
        }
        Command::Check { id, day } => {
            let date = day.or(today);
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let snapshot = cache.snapshot();
            let id = resolve_id(&snapshot, &id)?;
            let patch = match snapshot.get(&id).map(|r| &r.metadata) {
                Some(Metadata::Todo { checked, .. }) => MetadataPatch::checked(!checked),
                Some(Metadata::Habit(habit)) => {
                    let mut habit = habit.clone();
                    habit.toggle(date);
                    MetadataPatch::completions(habit.completions)
                }
                Some(other) => bail!("{id} is a {} entry and cannot be checked", other.record_type()),
                None => bail!("no entry {id} on {date}"),
            };
            if let Some(record) = cache.update_metadata(&id, patch).await? {
                writeln!(out, "{}", render(&record, date))?;
            }
        }
        Command::Move { id, day, place } => {
            let date = day.or(today);
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let snapshot = cache.snapshot();
            let id = resolve_id(&snapshot, &id)?;
            let position = place_in(&snapshot, Some(&id), &place)?;
            cache.reorder(&id, position).await?;
            writeln!(out, "moved {id}")?;
        }
        Command::Rm { id, day } => {
            let date = day.or(today);
            let cache = registry.get_or_create(date);
            cache.load().await?;
            let id = resolve_id(&cache.snapshot(), &id)?;
            if cache.delete(&id).await? {
                writeln!(out, "deleted {id}")?;
            }
        }
        Command::Log { record, limit } => {
            let events = match record {
                Some(id) => store.events_for_record(&id).await?,
                None => store.events(limit).await?,
            };
            for event in &events {
                writeln!(out, "{}", render_event(event))?;
            }
        }
    }
    Ok(())
}

fn new_metadata(record_type: RecordType, level: Option<u64>, text: &str) -> Result<Metadata> {
    let metadata = match (record_type, level) {
        (RecordType::Heading, Some(level)) => Metadata::Heading {
            level: HeadingLevel::from_level(level)
                .with_context(|| format!("heading level must be 1, 2 or 3, got {level}"))?,
        },
        (_, Some(_)) => bail!("--level only applies to headings"),
        (RecordType::Habit, None) => Metadata::Habit(HabitMetadata::new(text)),
        (other, None) => Metadata::default_for(other),
    };
    Ok(metadata)
}

/// Position for `moving` (or a new entry when None) according to `place`.
/// The moving entry itself is ignored when looking up neighbors. Fails when
/// the neighbors are too close for a distinct position.
fn place_in(snapshot: &DailySnapshot, moving: Option<&str>, place: &Placement) -> Result<f64> {
    let mut view = snapshot.clone();
    if let Some(id) = moving {
        view.records.remove(id);
    }

    let position = if place.top {
        view.position_at_start()
    } else if let Some(anchor) = &place.before {
        let anchor = resolve_id(&view, anchor)?;
        view.position_before(&anchor)
            .with_context(|| format!("no entry {anchor}"))?
    } else if let Some(anchor) = &place.after {
        let anchor = resolve_id(&view, anchor)?;
        view.position_after(&anchor)
            .with_context(|| format!("no entry {anchor}"))?
    } else {
        view.position_at_end()
    };

    if view.records.values().any(|r| r.order_position == position) {
        bail!("no room left between neighboring entries on {}", view.date);
    }
    Ok(position)
}

/// Match a full id or a unique prefix of one, case-insensitively.
fn resolve_id(snapshot: &DailySnapshot, needle: &str) -> Result<String> {
    let needle = needle.trim().to_ascii_uppercase();
    if needle.is_empty() {
        bail!("an entry id is required");
    }
    if snapshot.records.contains_key(&needle) {
        return Ok(needle);
    }

    let matches: Vec<&String> = snapshot
        .records
        .keys()
        .filter(|id| id.to_ascii_uppercase().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [id] => Ok((*id).clone()),
        [] => bail!("no entry {needle} on {}", snapshot.date),
        _ => bail!("{needle} matches {} entries on {}", matches.len(), snapshot.date),
    }
}

/// One-line rendering of a record for terminal output.
pub fn render(record: &Record, today: NaiveDate) -> String {
    match &record.metadata {
        Metadata::Text => record.content.clone(),
        Metadata::Heading { level } => {
            format!("{} {}", "#".repeat(usize::from(level.level())), record.content)
        }
        Metadata::Todo {
            checked,
            indent_level,
        } => format!(
            "{}[{}] {}",
            indent(*indent_level),
            if *checked { "x" } else { " " },
            record.content
        ),
        Metadata::BulletList { indent_level } => {
            format!("{}- {}", indent(*indent_level), record.content)
        }
        Metadata::Habit(habit) => {
            let stats = habit.stats(today);
            format!(
                "({}) {} [{}; streak {}, best {}, total {}]",
                if habit.is_completed_on(record.date) { "x" } else { " " },
                habit.name,
                habit.frequency.as_str(),
                stats.current_streak,
                stats.longest_streak,
                stats.total_completions
            )
        }
    }
}

fn render_event(event: &Event) -> String {
    format!(
        "#{} {} {} {} {} {}",
        event.event_id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.event_type,
        event.record_id,
        event.device_id.as_deref().unwrap_or("-"),
        event.payload.content
    )
}

fn indent(level: u32) -> String {
    "  ".repeat(level as usize)
}
