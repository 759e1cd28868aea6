//! Stamp minting and resolution
//!
//! Every version is written under a [`Stamp`]. The authority hands out one
//! [`StampSequence`] per distinct stamp tuple and resolves sequences back
//! to their stamps for the path resolver.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{Error, Result, Stamp, StampSequence};

/// Resolves stamp sequences to stamps.
///
/// This is what a [`crate::PathResolver`] consults; anything able to answer
/// it (an in-process authority, a test fixture) can back a resolver.
pub trait StampService: Send + Sync {
    /// Stamp minted as `seq`, if any
    fn stamp(&self, seq: StampSequence) -> Option<Stamp>;
}

/// In-process stamp authority.
///
/// # Thread Safety
///
/// Minting runs under the shard lock of the stamp's entry, so concurrent
/// callers minting an equal stamp all receive the same sequence.
pub struct StampAuthority {
    by_stamp: DashMap<Stamp, StampSequence>,
    by_sequence: DashMap<StampSequence, Stamp>,
    next: AtomicU32,
}

impl StampAuthority {
    /// Create an authority with no stamps
    pub fn new() -> Self {
        StampAuthority {
            by_stamp: DashMap::new(),
            by_sequence: DashMap::new(),
            next: AtomicU32::new(StampSequence::FIRST.get()),
        }
    }

    /// Sequence for `stamp`, minting one on first sight
    pub fn mint(&self, stamp: Stamp) -> StampSequence {
        if let Some(seq) = self.by_stamp.get(&stamp) {
            return *seq;
        }
        match self.by_stamp.entry(stamp) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let seq = StampSequence::new(self.next.fetch_add(1, Ordering::AcqRel));
                self.by_sequence.insert(seq, stamp);
                entry.insert(seq);
                seq
            }
        }
    }

    /// Sequence already minted for `stamp`
    pub fn sequence_of(&self, stamp: &Stamp) -> Option<StampSequence> {
        self.by_stamp.get(stamp).map(|seq| *seq)
    }

    /// Restore a persisted stamp under its original sequence.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the sequence or the stamp is already bound
    /// differently.
    pub fn restore(&self, seq: StampSequence, stamp: Stamp) -> Result<()> {
        if let Some(existing) = self.by_sequence.get(&seq) {
            if *existing == stamp {
                return Ok(());
            }
            return Err(Error::invalid_input(format!(
                "{seq} is already minted as {}",
                *existing
            )));
        }
        if let Some(other) = self.sequence_of(&stamp) {
            return Err(Error::invalid_input(format!(
                "stamp {stamp} is already minted as {other}"
            )));
        }
        self.by_sequence.insert(seq, stamp);
        self.by_stamp.insert(stamp, seq);
        self.next
            .fetch_max(seq.get().saturating_add(1), Ordering::AcqRel);
        Ok(())
    }

    /// Number of minted stamps
    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    /// Whether nothing has been minted
    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }

    /// Every minted stamp, ordered by sequence
    pub fn entries(&self) -> Vec<(StampSequence, Stamp)> {
        let mut entries: Vec<(StampSequence, Stamp)> = self
            .by_sequence
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries
    }
}

impl Default for StampAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl StampService for StampAuthority {
    fn stamp(&self, seq: StampSequence) -> Option<Stamp> {
        self.by_sequence.get(&seq).map(|stamp| *stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tessera_core::{Nid, Status};

    fn stamp(time: i64, path: u32) -> Stamp {
        Stamp::new(Status::Active, time, Nid::new(1), Nid::new(2), Nid::new(path))
    }

    #[test]
    fn test_mint_once_per_tuple() {
        let authority = StampAuthority::new();
        let a = authority.mint(stamp(100, 5));
        let b = authority.mint(stamp(200, 5));
        assert_ne!(a, b);
        assert_eq!(authority.mint(stamp(100, 5)), a);
        assert_eq!(authority.stamp(a), Some(stamp(100, 5)));
        assert_eq!(authority.sequence_of(&stamp(200, 5)), Some(b));
        assert_eq!(authority.len(), 2);
    }

    #[test]
    fn test_unknown_sequence_is_none() {
        let authority = StampAuthority::new();
        assert!(authority.stamp(StampSequence::new(9)).is_none());
    }

    #[test]
    fn test_restore_advances_counter_and_rejects_rebinding() {
        let authority = StampAuthority::new();
        authority.restore(StampSequence::new(10), stamp(1, 1)).unwrap();
        authority.restore(StampSequence::new(10), stamp(1, 1)).unwrap();
        assert!(authority.restore(StampSequence::new(10), stamp(2, 1)).is_err());
        assert!(authority.restore(StampSequence::new(11), stamp(1, 1)).is_err());

        assert_eq!(authority.mint(stamp(3, 1)), StampSequence::new(11));
        let seqs: Vec<u32> = authority.entries().iter().map(|(s, _)| s.get()).collect();
        assert_eq!(seqs, vec![10, 11]);
    }

    #[test]
    fn test_concurrent_mint_of_equal_stamp() {
        let authority = Arc::new(StampAuthority::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let authority = Arc::clone(&authority);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    authority.mint(stamp(42, 3))
                })
            })
            .collect();

        let seen: HashSet<StampSequence> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(authority.len(), 1);
    }
}
