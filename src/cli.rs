// ABOUTME: Command-line interface definition for the daybook binary.
// ABOUTME: Subcommands map one-to-one onto day-cache and store operations.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use daybook_core::record::RecordType;

#[derive(Parser, Debug)]
#[command(name = "daybook")]
#[command(about = "Local-first daily journal", long_about = None)]
pub struct Cli {
    /// Data directory (overrides DAYBOOK_HOME)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add an entry to a day
    Add {
        /// Entry text (the habit name for habits)
        text: String,

        #[arg(long, value_enum, default_value_t = Kind::Text)]
        kind: Kind,

        /// Heading level, 1-3
        #[arg(long)]
        level: Option<u64>,

        #[command(flatten)]
        day: DayArg,

        #[command(flatten)]
        place: Placement,
    },

    /// Show a day's entries in order
    List {
        #[command(flatten)]
        day: DayArg,
    },

    /// Find entries containing a piece of text
    Search {
        query: String,

        /// Earliest day to include
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest day to include
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Replace an entry's text
    Edit {
        /// Entry id or a unique prefix of it
        id: String,

        text: String,

        #[command(flatten)]
        day: DayArg,
    },

    /// Toggle a todo, or a habit's completion for the day
    Check {
        /// Entry id or a unique prefix of it
        id: String,

        #[command(flatten)]
        day: DayArg,
    },

    /// Move an entry within its day
    Move {
        /// Entry id or a unique prefix of it
        id: String,

        #[command(flatten)]
        day: DayArg,

        #[command(flatten)]
        place: Placement,
    },

    /// Delete an entry
    Rm {
        /// Entry id or a unique prefix of it
        id: String,

        #[command(flatten)]
        day: DayArg,
    },

    /// Show the event log
    Log {
        /// Only events for this record id
        #[arg(long)]
        record: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct DayArg {
    /// Day as YYYY-MM-DD (default: today)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

impl DayArg {
    pub fn or(self, today: NaiveDate) -> NaiveDate {
        self.date.unwrap_or(today)
    }
}

/// Where an entry goes relative to the rest of the day. With nothing set the
/// entry goes to the bottom.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct Placement {
    /// Put the entry first
    #[arg(long)]
    pub top: bool,

    /// Put the entry directly before this id
    #[arg(long)]
    pub before: Option<String>,

    /// Put the entry directly after this id
    #[arg(long)]
    pub after: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Text,
    Heading,
    Todo,
    Bullet,
    Habit,
}

impl From<Kind> for RecordType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Text => RecordType::Text,
            Kind::Heading => RecordType::Heading,
            Kind::Todo => RecordType::Todo,
            Kind::Bullet => RecordType::BulletList,
            Kind::Habit => RecordType::Habit,
        }
    }
}
