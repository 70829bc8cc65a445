//! In-process memo cache of resolved dates.

use chrono::{DateTime, Utc};
use daycache_core::{DateKey, FetchRecord, Record};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// A cached resolution: the stored record and its materialized records.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Metadata of the stored fetch this entry mirrors.
    pub record: FetchRecord,
    /// Decoded records, shared with every caller served from this entry.
    pub records: Arc<Vec<Record>>,
    /// When the entry was stored.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(record: FetchRecord, records: Arc<Vec<Record>>) -> Self {
        Self {
            record,
            records,
            cached_at: Utc::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.cached_at);
        age > chrono::TimeDelta::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX)
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

/// Entries plus a recency index: `recency` maps use tick to key, oldest first.
#[derive(Debug, Default)]
struct LruState {
    slots: HashMap<DateKey, Slot>,
    recency: BTreeMap<u64, DateKey>,
    tick: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, date: DateKey) -> Option<Slot> {
        let slot = self.slots.remove(&date)?;
        self.recency.remove(&slot.last_used);
        Some(slot)
    }
}

/// Bounded, least-recently-used cache of resolved dates.
///
/// Storage stays authoritative: eviction only costs a storage read on the
/// next lookup. Every method takes the internal lock for a short, non-async
/// critical section, so lookups never wait on I/O.
#[derive(Debug)]
pub struct MemoCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl MemoCache {
    /// Create an empty cache holding at most `capacity` dates.
    ///
    /// A capacity of zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    /// The maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().slots.is_empty()
    }

    /// Returns the entry for `date`, marking it most recently used.
    pub fn lookup(&self, date: DateKey) -> Option<CacheEntry> {
        let mut state = self.state();
        let tick = state.next_tick();
        let slot = state.slots.get_mut(&date)?;
        let previous = std::mem::replace(&mut slot.last_used, tick);
        let entry = slot.entry.clone();
        state.recency.remove(&previous);
        state.recency.insert(tick, date);
        trace!(date = %date, "Memo cache hit");
        Some(entry)
    }

    /// Inserts or replaces the entry for `date`, evicting the least recently
    /// used entry if the cache is full.
    pub fn store(&self, date: DateKey, record: FetchRecord, records: Arc<Vec<Record>>) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state();
        state.remove(date);
        let tick = state.next_tick();
        state.slots.insert(
            date,
            Slot {
                entry: CacheEntry::new(record, records),
                last_used: tick,
            },
        );
        state.recency.insert(tick, date);

        while state.slots.len() > self.capacity {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            state.slots.remove(&oldest);
            trace!(date = %oldest, "Evicted from memo cache");
        }
    }

    /// Removes the entry for `date`. Returns true if one was present.
    pub fn invalidate(&self, date: DateKey) -> bool {
        let removed = self.state().remove(date).is_some();
        if removed {
            trace!(date = %date, "Invalidated memo cache entry");
        }
        removed
    }

    /// Removes entries older than `ttl`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_stale(&self, ttl: Duration) -> usize {
        let mut state = self.state();
        let stale: Vec<DateKey> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_stale(ttl))
            .map(|(date, _)| *date)
            .collect();
        for date in &stale {
            state.remove(*date);
        }
        stale.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.state();
        state.slots.clear();
        state.recency.clear();
    }

    /// The lock only guards plain map updates, so a poisoned state is still
    /// consistent.
    fn state(&self) -> MutexGuard<'_, LruState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
