//! Failure grouping: fingerprints and the dedup window store.
//!
//! Repeated failures with the same [`GroupingKey`] inside one window share a
//! single [`GroupingEntry`]. Every occurrence refreshes the entry's last-seen
//! time, so the entry stays live until a full window passes with no repeat.
//! After that it is treated as absent and the next occurrence opens a fresh
//! one.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::failure::Failure;

/// Deterministic fingerprint of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupingKey(String);

impl GroupingKey {
    /// Wraps an existing key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the key from kind, message and location.
    ///
    /// Hashed with BLAKE3 so the key is stable across processes and builds,
    /// which lets a shared cache group failures from several nodes.
    #[must_use]
    pub fn for_failure(failure: &Failure<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(failure.kind().as_bytes());
        hasher.update(b"\nmessage:");
        hasher.update(failure.message().as_bytes());
        hasher.update(b"\nlocation:");
        hasher.update(failure.location().unwrap_or_default().as_bytes());

        let hex = hasher.finalize().to_hex();
        Self(format!("failure:{}", &hex.as_str()[..16]))
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bookkeeping for one group of failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingEntry {
    /// When the current group opened.
    pub first_seen: DateTime<Utc>,
    /// The most recent occurrence.
    pub last_seen: DateTime<Utc>,
    /// Occurrences within the current window, including the first.
    pub occurrences: u64,
}

impl GroupingEntry {
    /// Opens a new window at `now`.
    #[must_use]
    pub const fn first(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            occurrences: 1,
        }
    }

    /// Records another occurrence in the same window.
    #[must_use]
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            first_seen: self.first_seen,
            last_seen: now.max(self.last_seen),
            occurrences: self.occurrences.saturating_add(1),
        }
    }

    /// When this entry expires: one window after the last occurrence.
    ///
    /// Saturates at the latest representable time.
    #[must_use]
    pub fn expires_at(&self, window: TimeDelta) -> DateTime<Utc> {
        self.last_seen
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// The result of recording one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// The live entry before this occurrence, if the window was open.
    pub previous: Option<GroupingEntry>,
    /// The entry after this occurrence.
    pub current: GroupingEntry,
}

impl Occurrence {
    /// Returns true if this occurrence opened a new window.
    #[must_use]
    pub const fn is_first(&self) -> bool {
        self.previous.is_none()
    }

    /// Returns the occurrence count within the window.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.current.occurrences
    }
}

/// Storage for grouping entries with expiry.
///
/// Implementations may be local or backed by a shared store; consistency
/// across processes is the implementation's concern.
pub trait GroupingCache: Send + Sync + fmt::Debug {
    /// Returns the entry for `key` unless it has expired at `now`.
    fn get(&self, key: &GroupingKey, now: DateTime<Utc>) -> Option<GroupingEntry>;

    /// Stores `entry` for `key`, expiring at `expires_at`.
    fn set(&self, key: &GroupingKey, entry: GroupingEntry, expires_at: DateTime<Utc>);

    /// Records one occurrence of `key` at `now`.
    ///
    /// The default is a plain get followed by a set. Two concurrent callers
    /// may both see no entry and both report a first occurrence; stores that
    /// can do better should override this with an atomic update.
    fn record(&self, key: &GroupingKey, now: DateTime<Utc>, window: TimeDelta) -> Occurrence {
        let previous = self.get(key, now);
        let current = previous
            .as_ref()
            .map_or_else(|| GroupingEntry::first(now), |entry| entry.refreshed(now));
        self.set(key, current.clone(), current.expires_at(window));
        Occurrence { previous, current }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: GroupingEntry,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct MemoryState {
    entries: HashMap<GroupingKey, StoredEntry>,
    last_sweep: Option<DateTime<Utc>>,
}

/// In-process grouping cache.
///
/// Expiry is lazy: an expired entry is treated as absent on lookup and
/// overwritten by the next occurrence. Expired entries are also swept at most
/// once per sweep interval so keys that never recur do not accumulate.
#[derive(Debug)]
pub struct MemoryGroupingCache {
    state: Mutex<MemoryState>,
    sweep_interval: TimeDelta,
}

impl MemoryGroupingCache {
    /// Creates an empty cache that sweeps at most once a minute.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_interval(TimeDelta::minutes(1))
    }

    /// Creates an empty cache with a custom sweep interval.
    #[must_use]
    pub fn with_sweep_interval(sweep_interval: TimeDelta) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                last_sweep: None,
            }),
            sweep_interval,
        }
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Removes entries expired at `now`, returning how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        Self::sweep_locked(&mut state, now)
    }

    fn sweep_locked(state: &mut MemoryState, now: DateTime<Utc>) -> usize {
        let before = state.entries.len();
        state.entries.retain(|_, stored| !stored.is_expired(now));
        state.last_sweep = Some(now);

        let removed = before.saturating_sub(state.entries.len());
        if removed > 0 {
            debug!(removed, "swept expired grouping entries");
        }
        removed
    }

    fn maybe_sweep(&self, state: &mut MemoryState, now: DateTime<Utc>) {
        let due = state
            .last_sweep
            .is_none_or(|last| now.signed_duration_since(last) >= self.sweep_interval);
        if due {
            Self::sweep_locked(state, now);
        }
    }
}

impl Default for MemoryGroupingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupingCache for MemoryGroupingCache {
    fn get(&self, key: &GroupingKey, now: DateTime<Utc>) -> Option<GroupingEntry> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.entry.clone())
    }

    fn set(&self, key: &GroupingKey, entry: GroupingEntry, expires_at: DateTime<Utc>) {
        self.state
            .lock()
            .entries
            .insert(key.clone(), StoredEntry { entry, expires_at });
    }

    fn record(&self, key: &GroupingKey, now: DateTime<Utc>, window: TimeDelta) -> Occurrence {
        let mut state = self.state.lock();
        self.maybe_sweep(&mut state, now);

        let previous = state
            .entries
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.entry.clone());
        let current = previous
            .as_ref()
            .map_or_else(|| GroupingEntry::first(now), |entry| entry.refreshed(now));

        state.entries.insert(
            key.clone(),
            StoredEntry {
                entry: current.clone(),
                expires_at: current.expires_at(window),
            },
        );

        Occurrence { previous, current }
    }
}
