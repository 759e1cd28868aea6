//! Open-addressing probe table over 128-bit keys
//!
//! Double hashing over a prime-sized slot array. Every slot is a set of
//! atomics so that optimistic readers may scan the table while a writer
//! mutates it; readers detect interference through the version stamp kept
//! by [`ProbeMap`](crate::probe_map::ProbeMap), never by looking at slots.
//!
//! # Slot states
//!
//! ```text
//! FREE ──insert──▶ FULL ──remove──▶ REMOVED ──insert──▶ FULL
//! ```
//!
//! - Insertion probes past FULL and REMOVED slots, remembering the first
//!   REMOVED slot so tombstones get reused.
//! - Lookup stops only at FREE: a REMOVED slot may sit in front of the key.
//!
//! Mutating methods take `&self` but assume a single writer at a time; the
//! owning map serializes writers.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use uuid::Uuid;

/// Fixed-width key codec: a key is exactly two 64-bit words.
pub trait WideKey: Copy + Eq + Send + Sync + 'static {
    /// Split into (high, low) words
    fn to_words(&self) -> (u64, u64);

    /// Rebuild from (high, low) words
    fn from_words(high: u64, low: u64) -> Self;
}

impl WideKey for Uuid {
    #[inline]
    fn to_words(&self) -> (u64, u64) {
        self.as_u64_pair()
    }

    #[inline]
    fn from_words(high: u64, low: u64) -> Self {
        Uuid::from_u64_pair(high, low)
    }
}

impl WideKey for u128 {
    #[inline]
    fn to_words(&self) -> (u64, u64) {
        ((*self >> 64) as u64, *self as u64)
    }

    #[inline]
    fn from_words(high: u64, low: u64) -> Self {
        ((high as u128) << 64) | low as u128
    }
}

/// Slot marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Never used
    Free = 0,
    /// Holds a live key
    Full = 1,
    /// Tombstone left by a removal
    Removed = 2,
}

impl SlotState {
    #[inline]
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SlotState::Full,
            2 => SlotState::Removed,
            _ => SlotState::Free,
        }
    }
}

struct Slot {
    state: AtomicU8,
    high: AtomicU64,
    low: AtomicU64,
    value: AtomicU32,
}

impl Slot {
    fn free() -> Self {
        Slot {
            state: AtomicU8::new(SlotState::Free as u8),
            high: AtomicU64::new(0),
            low: AtomicU64::new(0),
            value: AtomicU32::new(0),
        }
    }

    #[inline]
    fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn holds(&self, high: u64, low: u64) -> bool {
        self.high.load(Ordering::Relaxed) == high && self.low.load(Ordering::Relaxed) == low
    }
}

/// Result of [`ProbeTable::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Key was absent and now maps to the value
    Inserted,
    /// Key was present; its previous value was replaced
    Replaced(u32),
}

/// Prime-sized open-addressing table mapping `K` to `u32`.
pub struct ProbeTable<K: WideKey> {
    slots: Box<[Slot]>,
    len: AtomicUsize,
    removed: AtomicUsize,
    _key: PhantomData<K>,
}

impl<K: WideKey> ProbeTable<K> {
    /// Create a table with at least `capacity` slots.
    ///
    /// The actual capacity is the next prime, never below 5, so the
    /// secondary hash has room to step.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = next_prime(capacity.max(5));
        let slots = (0..capacity).map(|_| Slot::free()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            _key: PhantomData,
        }
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of FULL slots
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the table holds no keys
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of REMOVED tombstones
    #[inline]
    pub fn tombstones(&self) -> usize {
        self.removed.load(Ordering::Acquire)
    }

    /// Look up a key. Bounded by the capacity even if the table is being
    /// mutated underneath the caller.
    pub fn get(&self, key: &K) -> Option<u32> {
        let (high, low) = key.to_words();
        let capacity = self.capacity();
        let (mut index, step) = probe_start(high, low, capacity);
        for _ in 0..capacity {
            let slot = &self.slots[index];
            match slot.state() {
                SlotState::Free => return None,
                SlotState::Full if slot.holds(high, low) => {
                    return Some(slot.value.load(Ordering::Acquire));
                }
                _ => {}
            }
            index = advance(index, step, capacity);
        }
        None
    }

    /// Insert or replace. Returns `None` only when the table has no FREE or
    /// REMOVED slot left; callers rehash well before that.
    pub fn insert(&self, key: K, value: u32) -> Option<InsertOutcome> {
        let (high, low) = key.to_words();
        let capacity = self.capacity();
        let (mut index, step) = probe_start(high, low, capacity);
        let mut first_tombstone = None;
        let mut target = None;

        for _ in 0..capacity {
            let slot = &self.slots[index];
            match slot.state() {
                SlotState::Free => {
                    target = Some(first_tombstone.unwrap_or(index));
                    break;
                }
                SlotState::Full if slot.holds(high, low) => {
                    let previous = slot.value.swap(value, Ordering::AcqRel);
                    return Some(InsertOutcome::Replaced(previous));
                }
                SlotState::Removed if first_tombstone.is_none() => {
                    first_tombstone = Some(index);
                }
                _ => {}
            }
            index = advance(index, step, capacity);
        }

        let index = target.or(first_tombstone)?;
        let slot = &self.slots[index];
        if slot.state() == SlotState::Removed {
            self.removed.fetch_sub(1, Ordering::AcqRel);
        }
        slot.high.store(high, Ordering::Relaxed);
        slot.low.store(low, Ordering::Relaxed);
        slot.value.store(value, Ordering::Relaxed);
        slot.state.store(SlotState::Full as u8, Ordering::Release);
        self.len.fetch_add(1, Ordering::AcqRel);
        Some(InsertOutcome::Inserted)
    }

    /// Tombstone a key. Returns the value it mapped to.
    pub fn remove(&self, key: &K) -> Option<u32> {
        let (high, low) = key.to_words();
        let capacity = self.capacity();
        let (mut index, step) = probe_start(high, low, capacity);
        for _ in 0..capacity {
            let slot = &self.slots[index];
            match slot.state() {
                SlotState::Free => return None,
                SlotState::Full if slot.holds(high, low) => {
                    slot.state.store(SlotState::Removed as u8, Ordering::Release);
                    self.len.fetch_sub(1, Ordering::AcqRel);
                    self.removed.fetch_add(1, Ordering::AcqRel);
                    return Some(slot.value.load(Ordering::Acquire));
                }
                _ => {}
            }
            index = advance(index, step, capacity);
        }
        None
    }

    /// Every FULL slot as (key, value)
    pub fn entries(&self) -> impl Iterator<Item = (K, u32)> + '_ {
        self.slots.iter().filter_map(|slot| {
            if slot.state() != SlotState::Full {
                return None;
            }
            let key = K::from_words(
                slot.high.load(Ordering::Relaxed),
                slot.low.load(Ordering::Relaxed),
            );
            Some((key, slot.value.load(Ordering::Acquire)))
        })
    }

    /// Copy every FULL slot into a fresh table of `capacity` slots.
    pub fn rehash_into(&self, capacity: usize) -> ProbeTable<K> {
        let fresh = ProbeTable::with_capacity(capacity.max(self.len() + 1));
        for (key, value) in self.entries() {
            // Fresh table is strictly larger than the live key count.
            let _ = fresh.insert(key, value);
        }
        fresh
    }
}

#[inline]
fn mix(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Primary index and secondary step for a key.
///
/// The step is in `1..capacity-1`; with a prime capacity every step is
/// coprime to it and the probe sequence visits every slot.
#[inline]
fn probe_start(high: u64, low: u64, capacity: usize) -> (usize, usize) {
    let h1 = mix(high ^ low.rotate_left(32));
    let h2 = mix(low ^ high.rotate_left(17));
    let index = (h1 % capacity as u64) as usize;
    let step = 1 + (h2 % (capacity as u64 - 2)) as usize;
    (index, step)
}

#[inline]
fn advance(index: usize, step: usize, capacity: usize) -> usize {
    let next = index + step;
    if next >= capacity {
        next - capacity
    } else {
        next
    }
}

/// Smallest prime `>= n`
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}
