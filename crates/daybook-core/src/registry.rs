// ABOUTME: Registry owning one DailyStateCache per date with LRU-bounded lifetime.
// ABOUTME: Evicts least-recently-accessed caches over capacity and sweeps caches idle past a threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::daily::DailyStateCache;
use crate::repository::RecordRepository;

/// Cap used when no explicit limit is configured.
pub const DEFAULT_MAX_CACHES: usize = 7;

struct Entry {
    cache: Arc<DailyStateCache>,
    last_accessed: Instant,
    /// Breaks ties between accesses within the same clock tick.
    sequence: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<NaiveDate, Entry>,
    next_sequence: u64,
}

impl Inner {
    fn stamp(&mut self) -> (Instant, u64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        (Instant::now(), sequence)
    }
}

/// Factory and lifecycle manager for day caches. It never changes a
/// cache's content; disposal clears the cache and forgets it.
pub struct StateRegistry {
    repo: Arc<dyn RecordRepository>,
    max_caches: usize,
    inner: Mutex<Inner>,
}

impl StateRegistry {
    /// Create a registry holding at most `max_caches` caches (minimum 1).
    pub fn new(repo: Arc<dyn RecordRepository>, max_caches: usize) -> Self {
        Self {
            repo,
            max_caches: max_caches.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_caches(&self) -> usize {
        self.max_caches
    }

    /// Return the cache for `date`, creating it if needed. Capacity is
    /// enforced before this returns, so the registry is never observed over
    /// its cap. The returned cache is always the most recently accessed and
    /// therefore never the one evicted.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, since a new cache spawns
    /// its writer task.
    pub fn get_or_create(&self, date: NaiveDate) -> Arc<DailyStateCache> {
        let mut inner = self.lock();
        let (now, sequence) = inner.stamp();

        if let Some(entry) = inner.entries.get_mut(&date) {
            entry.last_accessed = now;
            entry.sequence = sequence;
            return Arc::clone(&entry.cache);
        }

        let cache = Arc::new(DailyStateCache::new(date, Arc::clone(&self.repo)));
        inner.entries.insert(
            date,
            Entry {
                cache: Arc::clone(&cache),
                last_accessed: now,
                sequence,
            },
        );
        tracing::debug!(%date, "created day cache");

        self.enforce_capacity(&mut inner);
        cache
    }

    /// Dispose every cache whose date is not in `active` and whose last access
    /// is older than `idle_threshold`. Returns the evicted dates, oldest first.
    pub fn evict_idle(&self, active: &[NaiveDate], idle_threshold: Duration) -> Vec<NaiveDate> {
        let mut inner = self.lock();
        let now = Instant::now();

        let mut idle: Vec<(Instant, u64, NaiveDate)> = inner
            .entries
            .iter()
            .filter(|(date, _)| !active.contains(date))
            .filter(|(_, entry)| now.duration_since(entry.last_accessed) > idle_threshold)
            .map(|(date, entry)| (entry.last_accessed, entry.sequence, *date))
            .collect();
        idle.sort();

        let evicted: Vec<NaiveDate> = idle.into_iter().map(|(_, _, date)| date).collect();
        for date in &evicted {
            if let Some(entry) = inner.entries.remove(date) {
                entry.cache.dispose();
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted idle day caches");
        }
        evicted
    }

    /// Dispose all caches, e.g. on shutdown.
    pub fn dispose_all(&self) {
        let mut inner = self.lock();
        for (_, entry) in inner.entries.drain() {
            entry.cache.dispose();
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.lock().entries.contains_key(&date)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident dates, ascending.
    pub fn cached_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.lock().entries.keys().copied().collect();
        dates.sort();
        dates
    }

    fn enforce_capacity(&self, inner: &mut Inner) {
        let excess = inner.entries.len().saturating_sub(self.max_caches);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(Instant, u64, NaiveDate)> = inner
            .entries
            .iter()
            .map(|(date, entry)| (entry.last_accessed, entry.sequence, *date))
            .collect();
        by_age.sort();

        for (_, _, date) in by_age.into_iter().take(excess) {
            if let Some(entry) = inner.entries.remove(&date) {
                tracing::debug!(%date, "evicting least recently used day cache");
                entry.cache.dispose();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily::LoadStatus;
    use crate::record::{Metadata, parse_date};
    use crate::testing::MemoryRepository;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn registry(max: usize) -> StateRegistry {
        StateRegistry::new(Arc::new(MemoryRepository::new()), max)
    }

    #[tokio::test(start_paused = true)]
    async fn lru_cap_keeps_two_most_recent() {
        let reg = registry(2);

        reg.get_or_create(day("2026-01-01"));
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create(day("2026-01-02"));
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create(day("2026-01-03"));

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.cached_dates(), vec![day("2026-01-02"), day("2026-01-03")]);
    }

    #[tokio::test(start_paused = true)]
    async fn access_refreshes_lru_position() {
        let reg = registry(2);

        reg.get_or_create(day("2026-01-01"));
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create(day("2026-01-02"));
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create(day("2026-01-01"));
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create(day("2026-01-03"));

        assert_eq!(reg.cached_dates(), vec![day("2026-01-01"), day("2026-01-03")]);
    }

    #[tokio::test]
    async fn same_instant_accesses_are_ordered_by_sequence() {
        let reg = registry(1);
        reg.get_or_create(day("2026-01-01"));
        reg.get_or_create(day("2026-01-02"));
        assert_eq!(reg.cached_dates(), vec![day("2026-01-02")]);
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let reg = registry(3);
        let a = reg.get_or_create(day("2026-01-01"));
        let b = reg.get_or_create(day("2026-01-01"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn evicted_cache_is_disposed() {
        let reg = registry(1);
        let first = reg.get_or_create(day("2026-01-01"));
        first.load().await.unwrap();
        first.create(Metadata::Text, "note", 1.0).await.unwrap();

        reg.get_or_create(day("2026-01-02"));

        let snap = first.snapshot();
        assert_eq!(snap.status, LoadStatus::Unloaded);
        assert!(snap.records.is_empty());
        assert!(!reg.contains(day("2026-01-01")));
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_spares_active_and_recent_dates() {
        let reg = registry(10);
        reg.get_or_create(day("2026-01-01"));
        reg.get_or_create(day("2026-01-02"));
        tokio::time::advance(Duration::from_secs(600)).await;
        reg.get_or_create(day("2026-01-03"));

        let evicted = reg.evict_idle(&[day("2026-01-02")], Duration::from_secs(300));

        assert_eq!(evicted, vec![day("2026-01-01")]);
        assert_eq!(reg.cached_dates(), vec![day("2026-01-02"), day("2026-01-03")]);
    }

    #[tokio::test]
    async fn dispose_all_empties_registry() {
        let reg = registry(3);
        reg.get_or_create(day("2026-01-01"));
        reg.get_or_create(day("2026-01-02"));
        reg.dispose_all();
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn zero_cap_is_raised_to_one() {
        let reg = registry(0);
        assert_eq!(reg.max_caches(), 1);
        reg.get_or_create(day("2026-01-01"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    #[should_panic]
    fn creating_a_cache_outside_a_runtime_panics() {
        let reg = registry(2);
        reg.get_or_create(day("2026-01-01"));
    }
}
