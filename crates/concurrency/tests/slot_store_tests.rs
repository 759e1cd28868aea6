//! Slot store tests under real concurrency and on disk
//!
//! These tests exercise:
//!
//! 1. **Merge on conflict** - racing puts to one sequence keep every version
//! 2. **Contention limit** - a merge that keeps losing gives up cleanly
//! 3. **Persistence** - write/initialize round trips, lazy decoding, loading
//!    under writes that already landed
//! 4. **Damage isolation** - corrupt or truncated records affect only
//!    their own slot, incompatible formats fail fast
//!
//! ```bash
//! cargo test -p tessera-concurrency --test slot_store_tests
//! ```

use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;
use tessera_concurrency::{SlotStore, SlotStoreConfig};
use tessera_core::{Chronology, Error, Nid, Result, Sequence, StampSequence, Version};
use tessera_durability::{Record, SegmentLayout, StoreMeta};

// ============================================================================
// Test Helpers
// ============================================================================

fn config() -> SlotStoreConfig {
    SlotStoreConfig {
        elements_per_segment: 16,
        max_segments: 64,
        max_merge_retries: 10_000,
        schema_version: 1,
    }
}

fn merge(existing: &Chronology, incoming: &Chronology, _seq: Sequence) -> Result<Chronology> {
    Ok(Chronology::merge(existing, incoming))
}

fn memory_store() -> Arc<SlotStore<Chronology>> {
    Arc::new(SlotStore::in_memory(config(), merge).unwrap())
}

fn disk_store(dir: &TempDir) -> SlotStore<Chronology> {
    SlotStore::persistent(dir.path(), "concept-", config(), merge).unwrap()
}

fn chronology(nid: u32, stamp: u32, data: &str) -> Chronology {
    Chronology::with_version(
        Nid::new(nid),
        Version::new(StampSequence::new(stamp), data.as_bytes()),
    )
}

fn stamps(chronology: &Chronology) -> Vec<u32> {
    chronology.stamps().map(|s| s.get()).collect()
}

// ============================================================================
// SECTION 1: Merge On Conflict
// ============================================================================

mod merge_on_conflict {
    use super::*;

    #[test]
    fn test_two_writers_same_sequence_keep_both_versions() {
        for _ in 0..200 {
            let store = memory_store();
            let barrier = Arc::new(Barrier::new(2));
            let seq = Sequence::new(42);

            let handles: Vec<_> = [(1u32, "v1"), (2u32, "v2")]
                .into_iter()
                .map(|(stamp, data)| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        store.put(seq, chronology(7, stamp, data)).unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let stored = store.get(seq).unwrap().unwrap();
            assert_eq!(stamps(&stored), vec![1, 2]);
            assert_eq!(store.len(), 1);
        }
    }

    #[test]
    fn test_many_writers_lose_nothing() {
        let store = memory_store();
        let threads = 8;
        let per_thread = 100;
        let barrier = Arc::new(Barrier::new(threads));
        let seq = Sequence::new(3);

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_thread {
                        let stamp = (t * per_thread + i + 1) as u32;
                        store.put(seq, chronology(9, stamp, "x")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = store.get(seq).unwrap().unwrap();
        assert_eq!(stored.len(), threads * per_thread);
        let expected: Vec<u32> = (1..=(threads * per_thread) as u32).collect();
        assert_eq!(stamps(&stored), expected);
    }

    #[test]
    fn test_repeated_put_is_idempotent() {
        let store = memory_store();
        let seq = Sequence::new(5);
        let value = chronology(1, 10, "same");

        store.put(seq, value.clone()).unwrap();
        let once = store.get(seq).unwrap().unwrap();
        store.put(seq, value.clone()).unwrap();
        store.put(seq, value).unwrap();
        assert_eq!(*store.get(seq).unwrap().unwrap(), *once);
    }

    #[test]
    fn test_read_after_write_across_threads() {
        let store = memory_store();
        let seq = Sequence::new(11);
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.put(seq, chronology(2, 4, "w")).unwrap())
        };
        writer.join().unwrap();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.get(seq).unwrap())
        };
        let seen = reader.join().unwrap().expect("write is visible after join");
        assert_eq!(stamps(&seen), vec![4]);
    }

    #[test]
    fn test_distinct_sequences_in_parallel() {
        let store = memory_store();
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let raw = t * 200 + i + 1;
                        store.put(Sequence::new(raw), chronology(raw, 1, "d")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 800);
        assert_eq!(store.sequences().len(), 800);
        assert_eq!(store.stream().filter(|(_, v)| v.is_ok()).count(), 800);
    }
}

// ============================================================================
// SECTION 2: Contention Limit
// ============================================================================

#[test]
fn test_merge_that_keeps_losing_exhausts_retries() {
    const MARKER: u32 = 999;
    let entered = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));

    let store = {
        let entered = Arc::clone(&entered);
        let resume = Arc::clone(&resume);
        let config = SlotStoreConfig {
            max_merge_retries: 1,
            ..config()
        };
        Arc::new(
            SlotStore::in_memory(config, move |existing: &Chronology, incoming: &Chronology, _| {
                if incoming.version(StampSequence::new(MARKER)).is_some() {
                    // Hold the merge open while another writer lands.
                    entered.wait();
                    resume.wait();
                }
                Ok(Chronology::merge(existing, incoming))
            })
            .unwrap(),
        )
    };

    let seq = Sequence::new(1);
    store.put(seq, chronology(1, 1, "base")).unwrap();

    let slow = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.put(seq, chronology(1, MARKER, "slow")))
    };

    entered.wait();
    store.put(seq, chronology(1, 2, "fast")).unwrap();
    resume.wait();

    let result = slow.join().unwrap();
    assert!(matches!(
        result,
        Err(Error::RetryExhausted { sequence, attempts: 1 }) if sequence == seq
    ));
    assert_eq!(stamps(&store.get(seq).unwrap().unwrap()), vec![1, 2]);
}

// ============================================================================
// SECTION 3: Persistence
// ============================================================================

mod persistence {
    use super::*;

    #[test]
    fn test_write_then_initialize_restores_everything() {
        let dir = TempDir::new().unwrap();
        {
            let store = disk_store(&dir);
            for raw in [1u32, 2, 17, 40] {
                store.put(Sequence::new(raw), chronology(raw, raw, "v")).unwrap();
            }
            store.put(Sequence::new(2), chronology(2, 50, "later")).unwrap();
            let summary = store.write().unwrap();
            assert_eq!(summary.segments, 3);
            assert_eq!(summary.records, 4);
        }
        assert!(dir.path().join("concept-format.meta").exists());
        assert!(dir.path().join("concept-0.seg").exists());
        assert!(dir.path().join("concept-1.seg").exists());
        assert!(dir.path().join("concept-2.seg").exists());

        let store = disk_store(&dir);
        assert!(store.is_empty());
        assert_eq!(store.initialize().unwrap(), 4);
        assert_eq!(store.len(), 4);
        assert_eq!(
            store.sequences(),
            vec![Sequence::new(1), Sequence::new(2), Sequence::new(17), Sequence::new(40)]
        );
        assert_eq!(stamps(&store.get(Sequence::new(2)).unwrap().unwrap()), vec![2, 50]);
        assert_eq!(store.get(Sequence::new(40)).unwrap().unwrap().nid, Nid::new(40));
    }

    #[test]
    fn test_second_checkpoint_after_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = disk_store(&dir);
            store.put(Sequence::new(3), chronology(3, 1, "a")).unwrap();
            store.write().unwrap();
        }
        {
            let store = disk_store(&dir);
            store.initialize().unwrap();
            // Untouched reloaded segments are not rewritten.
            assert_eq!(store.write().unwrap().segments, 0);
            store.put(Sequence::new(4), chronology(4, 1, "b")).unwrap();
            assert_eq!(store.write().unwrap().records, 2);
        }

        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 2);
        assert!(store.get(Sequence::new(3)).unwrap().is_some());
        assert!(store.get(Sequence::new(4)).unwrap().is_some());
    }

    #[test]
    fn test_put_before_initialize_keeps_both_histories() {
        let dir = TempDir::new().unwrap();
        {
            let store = disk_store(&dir);
            store.put(Sequence::new(5), chronology(5, 1, "on disk")).unwrap();
            store.put(Sequence::new(6), chronology(6, 1, "untouched")).unwrap();
            store.write().unwrap();
        }

        let store = disk_store(&dir);
        store.put(Sequence::new(5), chronology(5, 2, "in memory")).unwrap();
        assert_eq!(store.initialize().unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(stamps(&store.get(Sequence::new(5)).unwrap().unwrap()), vec![1, 2]);
        store.write().unwrap();

        let reopened = disk_store(&dir);
        reopened.initialize().unwrap();
        assert_eq!(stamps(&reopened.get(Sequence::new(5)).unwrap().unwrap()), vec![1, 2]);
        assert_eq!(stamps(&reopened.get(Sequence::new(6)).unwrap().unwrap()), vec![1]);
    }

    #[test]
    fn test_empty_directory_initializes_empty() {
        let dir = TempDir::new().unwrap();
        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 0);
        assert!(store.is_empty());
    }
}

// ============================================================================
// SECTION 4: Damage Isolation
// ============================================================================

mod damage {
    use super::*;

    fn write_three(dir: &TempDir) {
        let store = disk_store(dir);
        for raw in 1..=3u32 {
            store.put(Sequence::new(raw), chronology(raw, raw, "payload")).unwrap();
        }
        store.write().unwrap();
    }

    #[test]
    fn test_checksum_damage_fails_only_that_get() {
        let dir = TempDir::new().unwrap();
        write_three(&dir);

        let path = dir.path().join("concept-0.seg");
        let mut data = std::fs::read(&path).unwrap();
        let mut offset = tessera_durability::format::SEGMENT_HEADER_SIZE;
        loop {
            let (record, consumed) = Record::from_bytes(&data[offset..]).unwrap();
            if record.key == 2 {
                // First payload byte, past the length and key.
                data[offset + 8] ^= 0xFF;
                break;
            }
            offset += consumed;
        }
        std::fs::write(&path, &data).unwrap();

        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 3);
        assert!(store.get(Sequence::new(1)).unwrap().is_some());
        assert!(matches!(
            store.get(Sequence::new(2)),
            Err(Error::CorruptRecord { sequence, .. }) if sequence == Sequence::new(2)
        ));
        assert!(store.get(Sequence::new(3)).unwrap().is_some());
        assert!(store.contains_key(Sequence::new(2)));

        let streamed: Vec<bool> = store.stream().map(|(_, v)| v.is_ok()).collect();
        assert_eq!(streamed, vec![true, false, true]);
    }

    #[test]
    fn test_undecodable_payload_fails_only_that_get() {
        let dir = TempDir::new().unwrap();
        StoreMeta::current(1, 16)
            .write_to_file(dir.path(), "concept-")
            .unwrap();
        let layout = SegmentLayout::new(dir.path(), "concept-", "seg");
        let good = bincode::serialize(&chronology(1, 1, "ok")).unwrap();
        let junk = vec![0xFFu8; 3];
        layout
            .write_segment(0, [(1u32, good.as_slice()), (2u32, junk.as_slice())])
            .unwrap();

        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 2);
        assert!(store.get(Sequence::new(1)).unwrap().is_some());
        assert!(store.get(Sequence::new(2)).unwrap_err().is_corruption());
        // The failure is remembered, not re-decoded into a different answer.
        assert!(store.get(Sequence::new(2)).is_err());
        assert!(store.put(Sequence::new(2), chronology(2, 9, "x")).is_err());
    }

    #[test]
    fn test_truncated_trailing_record_is_discarded() {
        let dir = TempDir::new().unwrap();
        write_three(&dir);

        let partial = Record::new(4, vec![7u8; 40]).to_bytes();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("concept-0.seg"))
            .unwrap();
        file.write_all(&partial[..20]).unwrap();
        drop(file);

        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 3);
        assert!(!store.contains_key(Sequence::new(4)));
        for raw in 1..=3u32 {
            assert!(store.get(Sequence::new(raw)).unwrap().is_some());
        }

        // The damaged segment is rewritten cleanly on the next write.
        assert_eq!(store.write().unwrap().segments, 1);
        let store = disk_store(&dir);
        assert_eq!(store.initialize().unwrap(), 3);
    }

    #[test]
    fn test_incompatible_schema_fails_fast() {
        let dir = TempDir::new().unwrap();
        write_three(&dir);

        let newer = SlotStoreConfig {
            schema_version: 2,
            ..config()
        };
        let store: SlotStore<Chronology> =
            SlotStore::persistent(dir.path(), "concept-", newer, merge).unwrap();
        assert!(matches!(store.initialize(), Err(Error::IncompatibleFormat(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_segments_without_sidecar_fail_fast() {
        let dir = TempDir::new().unwrap();
        write_three(&dir);
        std::fs::remove_file(dir.path().join("concept-format.meta")).unwrap();

        let store = disk_store(&dir);
        assert!(matches!(store.initialize(), Err(Error::IncompatibleFormat(_))));
    }
}
