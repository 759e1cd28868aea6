//! Wait-free versioned object map
//!
//! `SlotStore` maps a dense [`Sequence`] to one value (in practice a
//! [`tessera_core::Chronology`]). Slots live in fixed-size segments that
//! are allocated on first write; every slot is an atomically swappable
//! reference.
//!
//! # Concurrency
//!
//! - `get` is one atomic load. The first read of a slot loaded from disk
//!   decodes it and installs the decoded value with a compare-and-swap.
//! - `put` loads the slot, merges the incoming value with what is there
//!   using the store's merge function, and installs the result with a
//!   compare-and-swap. A lost race rereads and merges again, up to
//!   `max_merge_retries` attempts.
//! - No lock is ever taken; `write` and `initialize` do file I/O but never
//!   block readers or writers. A record loaded into a slot that a `put`
//!   already filled is merged like any other write.
//!
//! # Persistence
//!
//! A persistent store owns the files `<prefix><index>.seg` plus a
//! `<prefix>format.meta` sidecar in its directory. Each segment file holds
//! the records of one segment, keyed by sequence. `write` rewrites only
//! segments touched since the last write.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use tessera_core::{Error, Result, Sequence};
use tessera_durability::{ScanStop, ScannedRecord, SegmentLayout, StoreMeta};

use crate::config::SlotStoreConfig;
use crate::slot::{slot_ptr, Segment, SlotContent};

/// Combines the stored value with an incoming one for the same sequence.
///
/// Called as `merge(existing, incoming, sequence)`. It may run more than
/// once per `put` when writers race, so it must be a pure function of its
/// arguments. An error rejects the write and leaves the slot unchanged.
pub type MergeFn<T> = Arc<dyn Fn(&T, &T, Sequence) -> Result<T> + Send + Sync>;

const SEGMENT_SUFFIX: &str = "seg";

/// Outcome of [`SlotStore::write`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Segment files rewritten
    pub segments: usize,
    /// Records written across those segments
    pub records: usize,
}

/// Sequence-indexed store of merged values with segment-file persistence
pub struct SlotStore<T> {
    segments: Box<[OnceCell<Segment<T>>]>,
    config: SlotStoreConfig,
    merge: MergeFn<T>,
    layout: Option<SegmentLayout>,
    size: AtomicUsize,
    meta_written: AtomicBool,
}

impl<T> SlotStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Store that never touches disk
    pub fn in_memory<F>(config: SlotStoreConfig, merge: F) -> Result<Self>
    where
        F: Fn(&T, &T, Sequence) -> Result<T> + Send + Sync + 'static,
    {
        Self::build(config, Arc::new(merge), None)
    }

    /// Store persisted as `<dir>/<prefix><index>.seg`.
    ///
    /// Nothing is read until [`SlotStore::initialize`].
    pub fn persistent<F>(
        dir: impl Into<PathBuf>,
        prefix: &str,
        config: SlotStoreConfig,
        merge: F,
    ) -> Result<Self>
    where
        F: Fn(&T, &T, Sequence) -> Result<T> + Send + Sync + 'static,
    {
        let layout = SegmentLayout::new(dir, prefix, SEGMENT_SUFFIX);
        Self::build(config, Arc::new(merge), Some(layout))
    }

    fn build(
        config: SlotStoreConfig,
        merge: MergeFn<T>,
        layout: Option<SegmentLayout>,
    ) -> Result<Self> {
        config.validate()?;
        let segments = (0..config.max_segments)
            .map(|_| OnceCell::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(SlotStore {
            segments,
            config,
            merge,
            layout,
            size: AtomicUsize::new(0),
            meta_written: AtomicBool::new(false),
        })
    }

    /// Configuration the store was built with
    pub fn config(&self) -> &SlotStoreConfig {
        &self.config
    }

    /// Whether the store persists to disk
    pub fn is_persistent(&self) -> bool {
        self.layout.is_some()
    }

    #[inline]
    fn elements_per_segment(&self) -> usize {
        self.config.elements_per_segment as usize
    }

    /// (segment index, offset) of `seq`, if addressable
    #[inline]
    fn locate(&self, seq: Sequence) -> Option<(usize, usize)> {
        let eps = self.elements_per_segment();
        let index = seq.index() / eps;
        if index < self.segments.len() {
            Some((index, seq.index() % eps))
        } else {
            None
        }
    }

    fn existing_slot(&self, seq: Sequence) -> Option<&arc_swap::ArcSwapOption<SlotContent<T>>> {
        let (index, offset) = self.locate(seq)?;
        self.segments[index].get().map(|segment| segment.slot(offset))
    }

    fn segment_for_write(&self, seq: Sequence) -> Result<(&Segment<T>, usize)> {
        let (index, offset) = self.locate(seq).ok_or_else(|| {
            Error::invalid_input(format!(
                "sequence {seq} is outside store capacity {}",
                self.config.capacity()
            ))
        })?;
        let eps = self.elements_per_segment();
        let segment = self.segments[index].get_or_init(|| Segment::new(eps));
        Ok((segment, offset))
    }

    fn sequence_at(&self, index: usize, offset: usize) -> Sequence {
        Sequence::new((index * self.elements_per_segment() + offset) as u32)
    }

    fn decode(bytes: &[u8]) -> std::result::Result<T, String> {
        bincode::deserialize(bytes).map_err(|e| e.to_string())
    }

    /// Value stored at `seq`.
    ///
    /// Absent slots are `Ok(None)`. A record that cannot be decoded fails
    /// with [`Error::CorruptRecord`] for this sequence only.
    pub fn get(&self, seq: Sequence) -> Result<Option<Arc<T>>> {
        let Some(slot) = self.existing_slot(seq) else {
            return Ok(None);
        };

        loop {
            let current = slot.load_full();
            let bytes = match current.as_deref() {
                None => return Ok(None),
                Some(SlotContent::Decoded(value)) => return Ok(Some(Arc::clone(value))),
                Some(SlotContent::Corrupt(reason)) => return Err(corrupt(seq, reason)),
                Some(SlotContent::Encoded(bytes)) => bytes,
            };

            let (replacement, outcome) = match Self::decode(bytes) {
                Ok(value) => {
                    let value = Arc::new(value);
                    (SlotContent::Decoded(Arc::clone(&value)), Ok(Some(value)))
                }
                Err(reason) => {
                    warn!(sequence = seq.get(), reason = %reason, "slot record is unreadable");
                    let err = corrupt(seq, &reason);
                    (SlotContent::Corrupt(reason), Err(err))
                }
            };

            let previous = slot.compare_and_swap(&current, Some(Arc::new(replacement)));
            if slot_ptr(&*previous) == slot_ptr(&current) {
                return outcome;
            }
            // A writer replaced the encoded record first; read its value instead.
        }
    }

    /// Store `value` at `seq`, merging with any value already there.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `seq` is beyond the store's capacity
    /// - `CorruptRecord` if the existing record cannot be decoded
    /// - `RetryExhausted` if the slot kept changing under the merge
    /// - whatever the merge function rejects the pair with
    pub fn put(&self, seq: Sequence, value: T) -> Result<()> {
        let (segment, offset) = self.segment_for_write(seq)?;
        self.merge_into(segment, offset, seq, Arc::new(value))
    }

    fn merge_into(
        &self,
        segment: &Segment<T>,
        offset: usize,
        seq: Sequence,
        incoming: Arc<T>,
    ) -> Result<()> {
        let slot = segment.slot(offset);
        for attempt in 1..=self.config.max_merge_retries {
            let current = slot.load_full();
            let merged = match current.as_deref() {
                None => Arc::clone(&incoming),
                Some(SlotContent::Decoded(existing)) => {
                    Arc::new((self.merge)(&**existing, &*incoming, seq)?)
                }
                Some(SlotContent::Encoded(bytes)) => {
                    let existing = Self::decode(bytes).map_err(|reason| corrupt(seq, &reason))?;
                    Arc::new((self.merge)(&existing, &*incoming, seq)?)
                }
                Some(SlotContent::Corrupt(reason)) => return Err(corrupt(seq, reason)),
            };

            let replacement = Some(Arc::new(SlotContent::Decoded(merged)));
            let previous = slot.compare_and_swap(&current, replacement);
            if slot_ptr(&*previous) == slot_ptr(&current) {
                if current.is_none() {
                    self.size.fetch_add(1, Ordering::AcqRel);
                }
                segment.mark_dirty();
                return Ok(());
            }
            trace!(sequence = seq.get(), attempt, "slot changed during merge, retrying");
        }

        warn!(
            sequence = seq.get(),
            attempts = self.config.max_merge_retries,
            "giving up on contended slot"
        );
        Err(Error::RetryExhausted {
            sequence: seq,
            attempts: self.config.max_merge_retries,
        })
    }

    /// Whether `seq` holds anything (including an unreadable record)
    pub fn contains_key(&self, seq: Sequence) -> bool {
        self.existing_slot(seq)
            .map_or(false, |slot| slot.load().is_some())
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupied sequences, ascending
    pub fn sequences(&self) -> Vec<Sequence> {
        let mut sequences = Vec::with_capacity(self.len());
        for (index, cell) in self.segments.iter().enumerate() {
            let Some(segment) = cell.get() else { continue };
            for (offset, slot) in segment.slots().enumerate() {
                if slot.load().is_some() {
                    sequences.push(self.sequence_at(index, offset));
                }
            }
        }
        sequences
    }

    /// Lazy traversal of occupied slots in sequence order.
    ///
    /// Slots filled after the traversal passes their position are not
    /// seen. Unreadable records are yielded as errors.
    pub fn stream(&self) -> impl Iterator<Item = (Sequence, Result<Arc<T>>)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.get().map(|segment| (index, segment)))
            .flat_map(move |(index, segment)| {
                segment
                    .slots()
                    .enumerate()
                    .filter(|(_, slot)| slot.load().is_some())
                    .map(move |(offset, _)| self.sequence_at(index, offset))
            })
            .filter_map(move |seq| self.read_for_stream(seq))
    }

    /// Parallel traversal over the slots occupied when it starts
    pub fn par_stream(&self) -> impl ParallelIterator<Item = (Sequence, Result<Arc<T>>)> + '_ {
        self.sequences()
            .into_par_iter()
            .filter_map(move |seq| self.read_for_stream(seq))
    }

    fn read_for_stream(&self, seq: Sequence) -> Option<(Sequence, Result<Arc<T>>)> {
        match self.get(seq) {
            Ok(Some(value)) => Some((seq, Ok(value))),
            Ok(None) => None,
            Err(err) => Some((seq, Err(err))),
        }
    }

    /// Load every segment file of this store.
    ///
    /// Records stay encoded until first read. A record whose slot was
    /// already written is decoded and merged into it. Returns the number of
    /// slots filled from disk. In-memory stores load nothing.
    ///
    /// # Errors
    ///
    /// `IncompatibleFormat` if the sidecar is missing, damaged, or written
    /// with a different layout or schema; any merge error for a slot that
    /// was already written.
    pub fn initialize(&self) -> Result<usize> {
        self.initialize_retaining(|_| true)
    }

    /// [`initialize`](SlotStore::initialize), skipping records whose
    /// sequence `keep` rejects.
    ///
    /// A segment that lost records this way is rewritten on the next
    /// [`write`](SlotStore::write).
    pub fn initialize_retaining<F>(&self, keep: F) -> Result<usize>
    where
        F: Fn(Sequence) -> bool,
    {
        let Some(layout) = &self.layout else {
            return Ok(0);
        };

        let expected =
            StoreMeta::current(self.config.schema_version, self.config.elements_per_segment);
        let indices = layout.list_segments()?;
        match StoreMeta::read_from_file(layout.dir(), layout.prefix())? {
            Some(found) => {
                found.check_compatible(&expected)?;
                self.meta_written.store(true, Ordering::Release);
            }
            None if indices.is_empty() => {}
            None => {
                return Err(Error::IncompatibleFormat(format!(
                    "store '{}' has segment files but no format sidecar",
                    layout.prefix()
                )))
            }
        }

        let eps = self.elements_per_segment();
        let mut loaded = 0;
        for index in indices {
            if index >= self.segments.len() as u64 {
                return Err(Error::IncompatibleFormat(format!(
                    "segment {index} of store '{}' exceeds max_segments {}",
                    layout.prefix(),
                    self.config.max_segments
                )));
            }

            let contents = layout.read_segment(index)?;
            let segment = self.segments[index as usize].get_or_init(|| Segment::new(eps));
            for record in contents.records {
                let (key, content) = match record {
                    ScannedRecord::Valid(record) => {
                        (record.key, SlotContent::Encoded(record.payload))
                    }
                    ScannedRecord::Corrupt { key, reason } => (key, SlotContent::Corrupt(reason)),
                };
                if key as usize / eps != index as usize {
                    warn!(segment = index, key, "record outside its segment, skipping");
                    continue;
                }
                let seq = Sequence::new(key);
                if !keep(seq) {
                    warn!(sequence = key, "record rejected on load, dropping");
                    segment.mark_dirty();
                    continue;
                }

                let offset = key as usize % eps;
                let empty: Option<Arc<SlotContent<T>>> = None;
                let content = Arc::new(content);
                let previous = segment
                    .slot(offset)
                    .compare_and_swap(&empty, Some(Arc::clone(&content)));
                if previous.is_none() {
                    self.size.fetch_add(1, Ordering::AcqRel);
                    loaded += 1;
                    continue;
                }
                let unreadable = match &*content {
                    SlotContent::Encoded(bytes) => match Self::decode(bytes) {
                        Ok(value) => {
                            self.merge_into(segment, offset, seq, Arc::new(value))?;
                            continue;
                        }
                        Err(reason) => reason,
                    },
                    SlotContent::Corrupt(reason) => reason.clone(),
                    SlotContent::Decoded(_) => continue,
                };
                // The slot keeps the newer value; the segment is rewritten
                // without the damaged record.
                warn!(
                    sequence = key,
                    reason = %unreadable,
                    "unreadable record shadowed by a newer write"
                );
                segment.mark_dirty();
            }

            if contents.stop != ScanStop::EndOfData {
                // Rewrite on the next checkpoint so the damaged tail goes away.
                segment.mark_dirty();
            }
        }

        info!(store = layout.prefix(), slots = loaded, "slot store initialized");
        Ok(loaded)
    }

    /// Flush every segment changed since the last write.
    ///
    /// Each segment file is replaced atomically. If a segment fails to
    /// write, it stays dirty and earlier files are untouched.
    pub fn write(&self) -> Result<WriteSummary> {
        let Some(layout) = &self.layout else {
            return Ok(WriteSummary::default());
        };

        if !self.meta_written.load(Ordering::Acquire) {
            std::fs::create_dir_all(layout.dir())?;
            StoreMeta::current(self.config.schema_version, self.config.elements_per_segment)
                .write_to_file(layout.dir(), layout.prefix())?;
            self.meta_written.store(true, Ordering::Release);
        }

        let mut summary = WriteSummary::default();
        for (index, cell) in self.segments.iter().enumerate() {
            let Some(segment) = cell.get() else { continue };
            if !segment.take_dirty() {
                continue;
            }
            match self.write_segment(layout, index, segment) {
                Ok(records) => {
                    summary.segments += 1;
                    summary.records += records;
                }
                Err(err) => {
                    segment.mark_dirty();
                    return Err(err);
                }
            }
        }

        if summary.segments > 0 {
            info!(
                store = layout.prefix(),
                segments = summary.segments,
                records = summary.records,
                "slot store written"
            );
        }
        Ok(summary)
    }

    fn write_segment(
        &self,
        layout: &SegmentLayout,
        index: usize,
        segment: &Segment<T>,
    ) -> Result<usize> {
        let mut rows: Vec<(u32, Vec<u8>)> = Vec::new();
        for (offset, slot) in segment.slots().enumerate() {
            let Some(content) = slot.load_full() else { continue };
            let seq = self.sequence_at(index, offset);
            match &*content {
                SlotContent::Decoded(value) => {
                    let bytes = bincode::serialize(&**value)
                        .map_err(|e| Error::SerializationError(e.to_string()))?;
                    rows.push((seq.get(), bytes));
                }
                SlotContent::Encoded(bytes) => rows.push((seq.get(), bytes.clone())),
                SlotContent::Corrupt(reason) => {
                    warn!(
                        sequence = seq.get(),
                        reason = %reason,
                        "dropping unreadable record from segment"
                    );
                }
            }
        }

        let written = layout.write_segment(
            index as u64,
            rows.iter().map(|(key, bytes)| (*key, bytes.as_slice())),
        )?;
        debug!(store = layout.prefix(), segment = index, records = written, "segment written");
        Ok(written)
    }
}

fn corrupt(seq: Sequence, reason: &str) -> Error {
    Error::CorruptRecord {
        sequence: seq,
        reason: reason.to_string(),
    }
}
