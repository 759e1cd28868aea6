//! Slot contents and segment allocation
//!
//! A slot holds one of three things:
//! - the encoded bytes read from a segment file, not yet decoded
//! - a decoded value shared through an `Arc`
//! - a record that could not be read, with the reason
//!
//! Slots are `ArcSwapOption`s, so every state change is a single pointer
//! swap and readers never see a half-written value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// What a slot currently holds
#[derive(Debug)]
pub(crate) enum SlotContent<T> {
    /// Loaded from disk, decoded on first access
    Encoded(Vec<u8>),
    /// Materialized value
    Decoded(Arc<T>),
    /// Unreadable record
    Corrupt(String),
}

/// Fixed block of slots persisted as one segment file
pub(crate) struct Segment<T> {
    slots: Box<[ArcSwapOption<SlotContent<T>>]>,
    dirty: AtomicBool,
}

impl<T> Segment<T> {
    pub(crate) fn new(elements: usize) -> Self {
        let slots = (0..elements)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Segment {
            slots,
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn slot(&self, offset: usize) -> &ArcSwapOption<SlotContent<T>> {
        &self.slots[offset]
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &ArcSwapOption<SlotContent<T>>> + '_ {
        self.slots.iter()
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag, returning whether it was set
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

/// Pointer identity of a loaded slot value, null when empty
#[inline]
pub(crate) fn slot_ptr<T>(slot: &Option<Arc<SlotContent<T>>>) -> *const SlotContent<T> {
    slot.as_ref().map_or(std::ptr::null(), Arc::as_ptr)
}
