//! Per-type dense sequence allocation
//!
//! Each component type (concepts, semantics, ...) owns a
//! [`SequenceAllocator`] that hands out gapless sequences starting at
//! [`Sequence::FIRST`] to the NIDs it sees. The sequence is the slot index
//! used by that type's object store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tessera_core::{Error, Nid, Result, Sequence};

/// NID ↔ sequence map for one component type.
///
/// # Thread Safety
///
/// Assignment runs under the shard lock of the NID's entry, so two
/// callers assigning the same NID receive the same sequence and the
/// counter moves once. A restored sequence moves the counter past itself
/// before either direction is published.
pub struct SequenceAllocator {
    by_nid: DashMap<Nid, Sequence>,
    by_sequence: DashMap<Sequence, Nid>,
    next: AtomicU32,
}

impl SequenceAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self {
            by_nid: DashMap::new(),
            by_sequence: DashMap::new(),
            next: AtomicU32::new(Sequence::FIRST.get()),
        }
    }

    /// Sequence for `nid`, if assigned
    pub fn get(&self, nid: Nid) -> Option<Sequence> {
        self.by_nid.get(&nid).map(|seq| *seq)
    }

    /// Sequence for `nid`, assigning the next one if needed
    ///
    /// # Errors
    ///
    /// `Exhausted` once every sequence below `u32::MAX` is in use.
    pub fn get_or_assign(&self, nid: Nid) -> Result<Sequence> {
        if let Some(seq) = self.get(nid) {
            return Ok(seq);
        }
        match self.by_nid.entry(nid) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => loop {
                let seq = self
                    .next
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                        next.checked_add(1)
                    })
                    .map(Sequence::new)
                    .map_err(|_| Error::Exhausted("sequence"))?;
                // A concurrent restore may have claimed this sequence.
                if let Entry::Vacant(slot) = self.by_sequence.entry(seq) {
                    slot.insert(nid);
                    entry.insert(seq);
                    return Ok(seq);
                }
            },
        }
    }

    /// NID that owns `seq`, if any
    pub fn nid_for(&self, seq: Sequence) -> Option<Nid> {
        self.by_sequence.get(&seq).map(|nid| *nid)
    }

    /// Restore a known assignment.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if either side is already bound to something else,
    /// or for `u32::MAX`, which is never assigned.
    pub fn put(&self, nid: Nid, seq: Sequence) -> Result<()> {
        let Some(after) = seq.get().checked_add(1) else {
            return Err(Error::invalid_input(format!("{seq} is not assignable")));
        };
        // Lock order is by_nid then by_sequence, as in get_or_assign.
        let nid_entry = match self.by_nid.entry(nid) {
            Entry::Occupied(entry) if *entry.get() == seq => return Ok(()),
            Entry::Occupied(entry) => {
                return Err(Error::invalid_input(format!(
                    "{nid} already has sequence {}, not {seq}",
                    entry.get()
                )));
            }
            Entry::Vacant(entry) => entry,
        };
        match self.by_sequence.entry(seq) {
            Entry::Occupied(owner) => Err(Error::invalid_input(format!(
                "sequence {seq} already belongs to {}",
                owner.get()
            ))),
            Entry::Vacant(seq_entry) => {
                self.next.fetch_max(after, Ordering::AcqRel);
                seq_entry.insert(nid);
                nid_entry.insert(seq);
                Ok(())
            }
        }
    }

    /// Number of assigned sequences
    pub fn len(&self) -> usize {
        self.by_nid.len()
    }

    /// Whether nothing has been assigned
    pub fn is_empty(&self) -> bool {
        self.by_nid.is_empty()
    }

    /// Sequence the next assignment will receive
    pub fn next_sequence(&self) -> Sequence {
        Sequence::new(self.next.load(Ordering::Acquire))
    }

    /// Every assignment, ordered by sequence
    pub fn entries(&self) -> Vec<(Nid, Sequence)> {
        let mut entries: Vec<(Nid, Sequence)> = self
            .by_nid
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by_key(|(_, seq)| *seq);
        entries
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
