//! Concurrency-safe probe map with optimistic reads
//!
//! Wraps a [`ProbeTable`] with a version stamp (a sequence lock) and a
//! writer mutex:
//!
//! - Readers load the stamp, run the lookup against the current table, then
//!   check the stamp again. If a writer ran in between (or was running when
//!   the read began), the lookup is repeated while holding the writer mutex.
//! - Writers hold the mutex for the whole mutation and bump the stamp to an
//!   odd value before touching slots and back to even afterwards.
//!
//! Growth and shrink rebuild the table and publish it with a single atomic
//! swap, so a reader never sees a half-copied table.
//!
//! # Water marks
//!
//! - `len + tombstones` above `max_load_factor * capacity` triggers a rehash:
//!   to a larger table if live keys alone cross the mark, otherwise at the
//!   same size to purge tombstones.
//! - `len` below `min_load_factor * capacity` after a removal shrinks the
//!   table, never below `initial_capacity`.

use crate::probe::{next_prime, InsertOutcome, ProbeTable, WideKey};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Error, Result};

/// Sizing policy for a probe map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeMapConfig {
    /// Starting (and minimum) capacity
    pub initial_capacity: usize,
    /// High water mark: grow or purge tombstones above this fill ratio
    pub max_load_factor: f64,
    /// Low water mark: shrink below this fill ratio
    pub min_load_factor: f64,
}

impl Default for ProbeMapConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1021,
            max_load_factor: 0.5,
            min_load_factor: 0.1,
        }
    }
}

impl ProbeMapConfig {
    /// Check the water marks are ordered and in range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless `0 <= min < max < 1` and the initial
    /// capacity is positive.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 {
            return Err(Error::invalid_input("initial_capacity must be positive"));
        }
        if !(self.max_load_factor > 0.0 && self.max_load_factor < 1.0) {
            return Err(Error::invalid_input(format!(
                "max_load_factor must be in (0, 1), got {}",
                self.max_load_factor
            )));
        }
        if !(self.min_load_factor >= 0.0 && self.min_load_factor < self.max_load_factor) {
            return Err(Error::invalid_input(format!(
                "min_load_factor must be in [0, max_load_factor), got {}",
                self.min_load_factor
            )));
        }
        Ok(())
    }
}

/// Writer section. The stamp is odd for as long as the guard lives.
struct WriteSection<'a> {
    stamp: &'a AtomicU64,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.stamp.fetch_add(1, Ordering::Release);
    }
}

/// Probe map from a 128-bit key to a `u32` value.
pub struct ProbeMap<K: WideKey> {
    table: ArcSwap<ProbeTable<K>>,
    stamp: AtomicU64,
    writer: Mutex<()>,
    config: ProbeMapConfig,
}

impl<K: WideKey> ProbeMap<K> {
    /// Create an empty map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an invalid config.
    pub fn new(config: ProbeMapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table: ArcSwap::from_pointee(ProbeTable::with_capacity(config.initial_capacity)),
            stamp: AtomicU64::new(0),
            writer: Mutex::new(()),
            config,
        })
    }

    /// Run `read` optimistically; fall back to running it under the writer
    /// mutex if a writer interfered.
    pub fn read<R>(&self, read: impl Fn(&ProbeTable<K>) -> R) -> R {
        let before = self.stamp.load(Ordering::Acquire);
        if before & 1 == 0 {
            let table = self.table.load();
            let result = read(&table);
            fence(Ordering::Acquire);
            if self.stamp.load(Ordering::Relaxed) == before {
                return result;
            }
        }
        let _lock = self.writer.lock();
        read(&self.table.load())
    }

    fn begin_write(&self) -> WriteSection<'_> {
        let lock = self.writer.lock();
        self.stamp.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        WriteSection {
            stamp: &self.stamp,
            _lock: lock,
        }
    }

    /// Value for `key`, if present
    pub fn get(&self, key: &K) -> Option<u32> {
        self.read(|table| table.get(key))
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Whether any key maps to `value` (full scan)
    pub fn contains_value(&self, value: u32) -> bool {
        self.read(|table| table.entries().any(|(_, v)| v == value))
    }

    /// Every key mapping to `value` (full scan)
    pub fn keys_for(&self, value: u32) -> Vec<K> {
        self.read(|table| {
            table
                .entries()
                .filter(|(_, v)| *v == value)
                .map(|(k, _)| k)
                .collect()
        })
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<(K, u32)> {
        self.read(|table| table.entries().collect())
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity
    pub fn capacity(&self) -> usize {
        self.table.load().capacity()
    }

    /// Insert or replace a mapping
    pub fn insert(&self, key: K, value: u32) -> InsertOutcome {
        let _section = self.begin_write();
        self.insert_locked(key, value)
    }

    /// Return the existing value for `key`, or insert the value produced by
    /// `make` under the writer mutex. `make` runs at most once, and only when
    /// the key is absent.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> u32) -> u32 {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let _section = self.begin_write();
        if let Some(value) = self.table.load().get(&key) {
            return value;
        }
        let value = make();
        self.insert_locked(key, value);
        value
    }

    /// Run `write` as one writer section. Used by callers that must check
    /// and insert atomically with respect to other writers.
    pub fn with_write<R>(&self, write: impl FnOnce(&ProbeMapWriter<'_, K>) -> R) -> R {
        let _section = self.begin_write();
        write(&ProbeMapWriter { map: self })
    }

    /// Tombstone `key`, shrinking the table when it falls below the low
    /// water mark.
    pub fn remove(&self, key: &K) -> Option<u32> {
        let _section = self.begin_write();
        let table = self.table.load_full();
        let removed = table.remove(key)?;

        let capacity = table.capacity();
        let floor = next_prime(self.config.initial_capacity.max(5));
        let low_water = self.config.min_load_factor * capacity as f64;
        if capacity > floor && (table.len() as f64) < low_water {
            let target = next_prime((capacity / 2).max(floor));
            tracing::debug!(
                from = capacity,
                to = target,
                len = table.len(),
                "shrinking probe table"
            );
            self.table.store(Arc::new(table.rehash_into(target)));
        }
        Some(removed)
    }

    fn insert_locked(&self, key: K, value: u32) -> InsertOutcome {
        self.reserve_one();
        let table = self.table.load();
        match table.insert(key, value) {
            Some(outcome) => outcome,
            None => {
                // reserve_one keeps at least one FREE slot, so this is
                // unreachable; rebuild rather than lose the key.
                let grown = table.rehash_into(next_prime(table.capacity() * 2 + 1));
                let outcome = grown.insert(key, value).unwrap_or(InsertOutcome::Inserted);
                self.table.store(Arc::new(grown));
                outcome
            }
        }
    }

    /// Rehash ahead of an insert that would cross the high water mark.
    fn reserve_one(&self) {
        let table = self.table.load();
        let capacity = table.capacity();
        let high_mark = self.config.max_load_factor * capacity as f64;
        let live = table.len() + 1;
        if ((live + table.tombstones()) as f64) <= high_mark {
            return;
        }
        let target = if live as f64 > high_mark {
            next_prime(capacity * 2 + 1)
        } else {
            capacity
        };
        tracing::debug!(
            from = capacity,
            to = target,
            len = table.len(),
            tombstones = table.tombstones(),
            "rehashing probe table"
        );
        let rebuilt = table.rehash_into(target);
        self.table.store(Arc::new(rebuilt));
    }
}

/// Handle given to [`ProbeMap::with_write`] callers
pub struct ProbeMapWriter<'a, K: WideKey> {
    map: &'a ProbeMap<K>,
}

impl<K: WideKey> ProbeMapWriter<'_, K> {
    /// Lookup inside the writer section
    pub fn get(&self, key: &K) -> Option<u32> {
        self.map.table.load().get(key)
    }

    /// Insert inside the writer section
    pub fn insert(&self, key: K, value: u32) -> InsertOutcome {
        self.map.insert_locked(key, value)
    }
}
