// ABOUTME: Habit metadata and pure streak/completion statistics over a habit's completion dates.
// ABOUTME: Statistics are recomputed from the sorted date list on every call; nothing is cached.

use chrono::{Datelike, NaiveDate};

/// How often a habit is expected to be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HabitFrequency {
    #[default]
    Daily,
    Weekly,
}

impl HabitFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            HabitFrequency::Daily => "daily",
            HabitFrequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(HabitFrequency::Daily),
            "weekly" => Some(HabitFrequency::Weekly),
            _ => None,
        }
    }

    /// Index of the period containing `date`. Consecutive periods have
    /// consecutive indices.
    fn period(&self, date: NaiveDate) -> i64 {
        let day = i64::from(date.num_days_from_ce());
        match self {
            HabitFrequency::Daily => day,
            HabitFrequency::Weekly => {
                (day - i64::from(date.weekday().num_days_from_monday())).div_euclid(7)
            }
        }
    }
}

/// Fields carried by a habit record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HabitMetadata {
    pub name: String,
    pub frequency: HabitFrequency,
    /// Sorted ascending, no duplicates.
    pub completions: Vec<NaiveDate>,
    pub archived: bool,
}

impl HabitMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_completed_on(&self, date: NaiveDate) -> bool {
        self.completions.binary_search(&date).is_ok()
    }

    /// Flip completion for `date`. Returns whether the date is now completed.
    pub fn toggle(&mut self, date: NaiveDate) -> bool {
        match self.completions.binary_search(&date) {
            Ok(idx) => {
                self.completions.remove(idx);
                false
            }
            Err(idx) => {
                self.completions.insert(idx, date);
                true
            }
        }
    }

    pub fn stats(&self, today: NaiveDate) -> HabitStats {
        HabitStats::compute(&self.completions, self.frequency, today)
    }
}

/// Sort and deduplicate a completion list in place.
pub fn normalize_completions(completions: &mut Vec<NaiveDate>) {
    completions.sort_unstable();
    completions.dedup();
}

/// Summary figures for a habit as of a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HabitStats {
    pub total_completions: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub completed_this_period: bool,
}

impl HabitStats {
    /// Compute statistics from a completion list. Completions after `today`
    /// are ignored. The current streak survives until the period after the
    /// last completion has fully elapsed.
    pub fn compute(completions: &[NaiveDate], frequency: HabitFrequency, today: NaiveDate) -> Self {
        let current = frequency.period(today);

        let mut periods: Vec<i64> = completions
            .iter()
            .filter(|d| **d <= today)
            .map(|d| frequency.period(*d))
            .collect();
        periods.sort_unstable();
        periods.dedup();

        let mut longest = 0u32;
        let mut run = 0u32;
        let mut prev: Option<i64> = None;
        for p in &periods {
            run = match prev {
                Some(q) if *p == q + 1 => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            prev = Some(*p);
        }

        let current_streak = match periods.last() {
            Some(last) if *last == current || *last == current - 1 => run,
            _ => 0,
        };

        Self {
            total_completions: completions.iter().filter(|d| **d <= today).count(),
            current_streak,
            longest_streak: longest,
            completed_this_period: periods.last() == Some(&current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn days(list: &[&str]) -> Vec<NaiveDate> {
        list.iter().map(|s| day(s)).collect()
    }

    #[test]
    fn daily_streak_ending_today() {
        let completions = days(&["2026-03-01", "2026-03-02", "2026-03-03"]);
        let stats = HabitStats::compute(&completions, HabitFrequency::Daily, day("2026-03-03"));
        assert_eq!(stats.current_streak, 3);
        assert_eq!(stats.longest_streak, 3);
        assert!(stats.completed_this_period);
        assert_eq!(stats.total_completions, 3);
    }

    #[test]
    fn daily_streak_survives_until_end_of_next_day() {
        let completions = days(&["2026-03-01", "2026-03-02"]);
        let stats = HabitStats::compute(&completions, HabitFrequency::Daily, day("2026-03-03"));
        assert_eq!(stats.current_streak, 2);
        assert!(!stats.completed_this_period);

        let stats = HabitStats::compute(&completions, HabitFrequency::Daily, day("2026-03-04"));
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 2);
    }

    #[test]
    fn gap_resets_run_but_keeps_longest() {
        let completions = days(&[
            "2026-03-01",
            "2026-03-02",
            "2026-03-03",
            "2026-03-04",
            "2026-03-07",
            "2026-03-08",
        ]);
        let stats = HabitStats::compute(&completions, HabitFrequency::Daily, day("2026-03-08"));
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 4);
    }

    #[test]
    fn weekly_streak_counts_iso_weeks() {
        // Mondays 2026-03-02, 2026-03-09; Sunday 2026-03-22 is in the week of 2026-03-16.
        let completions = days(&["2026-03-04", "2026-03-10", "2026-03-22"]);
        let stats = HabitStats::compute(&completions, HabitFrequency::Weekly, day("2026-03-23"));
        assert_eq!(stats.current_streak, 3);
        assert!(!stats.completed_this_period);
    }

    #[test]
    fn future_completions_are_ignored() {
        let completions = days(&["2026-03-01", "2026-04-01"]);
        let stats = HabitStats::compute(&completions, HabitFrequency::Daily, day("2026-03-01"));
        assert_eq!(stats.total_completions, 1);
        assert_eq!(stats.current_streak, 1);
    }

    #[test]
    fn empty_completions() {
        let stats = HabitStats::compute(&[], HabitFrequency::Daily, day("2026-03-01"));
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 0);
        assert_eq!(stats.total_completions, 0);
    }

    #[test]
    fn toggle_keeps_completions_sorted() {
        let mut habit = HabitMetadata::new("Read");
        assert!(habit.toggle(day("2026-03-05")));
        assert!(habit.toggle(day("2026-03-01")));
        assert_eq!(habit.completions, days(&["2026-03-01", "2026-03-05"]));
        assert!(habit.is_completed_on(day("2026-03-05")));

        assert!(!habit.toggle(day("2026-03-05")));
        assert_eq!(habit.completions, days(&["2026-03-01"]));
    }
}
