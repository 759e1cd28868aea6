//! UUID ↔ NID identity maps
//!
//! A UUID is bound to exactly one NID, forever. Several UUIDs may share a
//! NID (a component known under more than one external identifier), so
//! the reverse direction returns a set.
//!
//! Two backends implement [`IdentifierMap`]:
//!
//! - [`ProbeIdentifierMap`]: open-addressing probe map with optimistic reads
//!   (the default).
//! - [`ConcurrentIdentifierMap`]: `DashMap` entry API plus an atomic counter.
//!
//! Both serve reverse lookups from a bounded, non-authoritative cache that
//! is switched on only during bulk loads; a cache miss falls back to a full
//! scan.

use crate::probe_map::{ProbeMap, ProbeMapConfig};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::{smallvec, SmallVec};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tessera_core::{Error, Nid, Result};
use uuid::Uuid;

/// Bijective-per-UUID identity map.
///
/// Lookups never fail for a missing key; they return `None`.
pub trait IdentifierMap: Send + Sync {
    /// NID bound to `uuid`, if any
    fn get(&self, uuid: &Uuid) -> Option<Nid>;

    /// NID bound to `uuid`, binding the next free NID if there is none.
    ///
    /// Concurrent callers passing the same UUID all receive the same NID.
    ///
    /// # Errors
    ///
    /// `Exhausted` once every NID below `u32::MAX` has been handed out.
    fn get_or_assign(&self, uuid: Uuid) -> Result<Nid>;

    /// Bind `uuid` to a known `nid` (bulk import).
    ///
    /// A NID at or above [`next_nid`](IdentifierMap::next_nid) is reserved
    /// before the binding becomes visible, so assignment never hands it out
    /// again. A lower NID adds `uuid` as one more alias of it.
    ///
    /// # Errors
    ///
    /// `IdentityConflict` if `uuid` is already bound to a different NID;
    /// `InvalidInput` for `u32::MAX`, which is never assignable.
    fn put(&self, uuid: Uuid, nid: Nid) -> Result<()>;

    /// NID shared by every UUID in `uuids`, assigning one if none is bound.
    ///
    /// # Errors
    ///
    /// `IdentityConflict` if two of the UUIDs are bound to different NIDs;
    /// `InvalidInput` for an empty slice.
    fn get_or_assign_all(&self, uuids: &[Uuid]) -> Result<Nid>;

    /// Whether `uuid` is bound
    fn contains_key(&self, uuid: &Uuid) -> bool {
        self.get(uuid).is_some()
    }

    /// Whether any UUID is bound to `nid`
    fn contains_value(&self, nid: Nid) -> bool;

    /// Every UUID bound to `nid`
    fn uuids_for(&self, nid: Nid) -> Vec<Uuid>;

    /// Number of bound UUIDs
    fn len(&self) -> usize;

    /// Whether no UUID is bound
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// NID the next assignment will receive
    fn next_nid(&self) -> Nid;

    /// Snapshot of every binding
    fn entries(&self) -> Vec<(Uuid, Nid)>;

    /// Start serving reverse lookups from the bounded cache
    fn begin_bulk_load(&self);

    /// Stop using (and drop) the reverse cache
    fn end_bulk_load(&self);
}

/// Bounded NID → UUIDs cache used during bulk loads.
///
/// Only complete entries are ever stored: a fresh NID is cached with its
/// first UUID and later bindings extend an entry only if it is already
/// cached. A full-scan result is cached only if no binding landed while the
/// scan ran. Overflow clears the cache.
struct ReverseCache {
    entries: DashMap<Nid, SmallVec<[Uuid; 2]>>,
    capacity: usize,
    enabled: AtomicBool,
    /// Bumped after every binding, before the cache is told about it
    generation: AtomicU64,
}

impl ReverseCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn enable(&self) {
        self.entries.clear();
        self.enabled.store(self.capacity > 0, Ordering::Release);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.entries.clear();
    }

    fn make_room(&self) {
        if self.entries.len() >= self.capacity {
            tracing::debug!(capacity = self.capacity, "reverse identifier cache full, clearing");
            self.entries.clear();
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn record_fresh(&self, nid: Nid, uuid: Uuid) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !self.is_enabled() {
            return;
        }
        self.make_room();
        self.entries.insert(nid, smallvec![uuid]);
    }

    fn record_additional(&self, nid: Nid, uuid: Uuid) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !self.is_enabled() {
            return;
        }
        if let Some(mut uuids) = self.entries.get_mut(&nid) {
            if !uuids.contains(&uuid) {
                uuids.push(uuid);
            }
        }
    }

    fn lookup(&self, nid: Nid) -> Option<Vec<Uuid>> {
        if !self.is_enabled() {
            return None;
        }
        self.entries.get(&nid).map(|uuids| uuids.to_vec())
    }

    /// Cache a scan that started at generation `seen`.
    ///
    /// The generation is compared under the entry's shard lock: a binding
    /// that lands later blocks in `record_additional` until the entry is
    /// in place and then extends it.
    fn record_scan(&self, nid: Nid, uuids: &[Uuid], seen: u64) {
        if !self.is_enabled() || uuids.is_empty() {
            return;
        }
        self.make_room();
        if let Entry::Vacant(slot) = self.entries.entry(nid) {
            if self.generation() == seen {
                slot.insert(uuids.iter().copied().collect());
            }
        }
    }
}

/// Probe-table backed identifier map (the default backend).
pub struct ProbeIdentifierMap {
    map: ProbeMap<Uuid>,
    next_nid: AtomicU32,
    reverse: ReverseCache,
}

impl ProbeIdentifierMap {
    /// Create an empty map.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an invalid probe configuration.
    pub fn new(config: ProbeMapConfig, reverse_cache_capacity: usize) -> Result<Self> {
        Ok(Self {
            map: ProbeMap::new(config)?,
            next_nid: AtomicU32::new(Nid::FIRST.get()),
            reverse: ReverseCache::new(reverse_cache_capacity),
        })
    }

    /// Current slot capacity of the underlying table
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }
}

/// Take the next NID from `counter`. `u32::MAX` itself is never handed out.
fn allocate(counter: &AtomicU32) -> Result<Nid> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
            next.checked_add(1)
        })
        .map(Nid::new)
        .map_err(|_| Error::Exhausted("NID"))
}

/// Move `counter` past `nid` before a bulk-imported binding is published.
fn reserve(counter: &AtomicU32, nid: Nid) -> Result<()> {
    let Some(after) = nid.get().checked_add(1) else {
        return Err(Error::invalid_input(format!("{nid} is not assignable")));
    };
    counter.fetch_max(after, Ordering::AcqRel);
    Ok(())
}

impl IdentifierMap for ProbeIdentifierMap {
    fn get(&self, uuid: &Uuid) -> Option<Nid> {
        self.map.get(uuid).map(Nid::new)
    }

    fn get_or_assign(&self, uuid: Uuid) -> Result<Nid> {
        if let Some(nid) = self.get(&uuid) {
            return Ok(nid);
        }
        self.map.with_write(|writer| match writer.get(&uuid) {
            Some(raw) => Ok(Nid::new(raw)),
            None => {
                let nid = allocate(&self.next_nid)?;
                writer.insert(uuid, nid.get());
                self.reverse.record_fresh(nid, uuid);
                Ok(nid)
            }
        })
    }

    fn put(&self, uuid: Uuid, nid: Nid) -> Result<()> {
        self.map.with_write(|writer| {
            if let Some(existing) = writer.get(&uuid) {
                if existing == nid.get() {
                    return Ok(());
                }
                return Err(Error::IdentityConflict {
                    uuid,
                    existing: Nid::new(existing),
                    requested: nid,
                });
            }
            reserve(&self.next_nid, nid)?;
            writer.insert(uuid, nid.get());
            self.reverse.record_additional(nid, uuid);
            Ok(())
        })
    }

    fn get_or_assign_all(&self, uuids: &[Uuid]) -> Result<Nid> {
        if uuids.is_empty() {
            return Err(Error::invalid_input("no UUIDs given"));
        }
        self.map.with_write(|writer| {
            let mut bound: Option<(Uuid, u32)> = None;
            for uuid in uuids {
                if let Some(raw) = writer.get(uuid) {
                    match bound {
                        Some((_, existing)) if existing != raw => {
                            return Err(Error::IdentityConflict {
                                uuid: *uuid,
                                existing: Nid::new(raw),
                                requested: Nid::new(existing),
                            });
                        }
                        _ => bound = Some((*uuid, raw)),
                    }
                }
            }
            let nid = match bound {
                Some((_, raw)) => Nid::new(raw),
                None => {
                    let nid = allocate(&self.next_nid)?;
                    writer.insert(uuids[0], nid.get());
                    self.reverse.record_fresh(nid, uuids[0]);
                    nid
                }
            };
            for uuid in uuids {
                if writer.get(uuid).is_none() {
                    writer.insert(*uuid, nid.get());
                    self.reverse.record_additional(nid, *uuid);
                }
            }
            Ok(nid)
        })
    }

    fn contains_value(&self, nid: Nid) -> bool {
        if self.reverse.lookup(nid).is_some() {
            return true;
        }
        self.map.contains_value(nid.get())
    }

    fn uuids_for(&self, nid: Nid) -> Vec<Uuid> {
        if let Some(uuids) = self.reverse.lookup(nid) {
            return uuids;
        }
        let seen = self.reverse.generation();
        let uuids = self.map.keys_for(nid.get());
        self.reverse.record_scan(nid, &uuids, seen);
        uuids
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn next_nid(&self) -> Nid {
        Nid::new(self.next_nid.load(Ordering::Acquire))
    }

    fn entries(&self) -> Vec<(Uuid, Nid)> {
        self.map
            .entries()
            .into_iter()
            .map(|(uuid, raw)| (uuid, Nid::new(raw)))
            .collect()
    }

    fn begin_bulk_load(&self) {
        self.reverse.enable();
    }

    fn end_bulk_load(&self) {
        self.reverse.disable();
    }
}

/// `DashMap`-backed identifier map.
///
/// Assignment goes through the entry API, so the shard lock for the UUID is
/// held while the counter is bumped and a racing caller sees the winner.
/// Assignment and bulk import share one counter: whichever of them moves it
/// past a NID first owns that NID.
/// [`get_or_assign_all`](IdentifierMap::get_or_assign_all) is not atomic
/// across UUIDs in this backend.
pub struct ConcurrentIdentifierMap {
    map: DashMap<Uuid, Nid>,
    next_nid: AtomicU32,
    reverse: ReverseCache,
}

impl ConcurrentIdentifierMap {
    /// Create an empty map
    pub fn new(reverse_cache_capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            next_nid: AtomicU32::new(Nid::FIRST.get()),
            reverse: ReverseCache::new(reverse_cache_capacity),
        }
    }
}

impl IdentifierMap for ConcurrentIdentifierMap {
    fn get(&self, uuid: &Uuid) -> Option<Nid> {
        self.map.get(uuid).map(|nid| *nid)
    }

    fn get_or_assign(&self, uuid: Uuid) -> Result<Nid> {
        if let Some(nid) = self.get(&uuid) {
            return Ok(nid);
        }
        match self.map.entry(uuid) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let nid = allocate(&self.next_nid)?;
                entry.insert(nid);
                self.reverse.record_fresh(nid, uuid);
                Ok(nid)
            }
        }
    }

    fn put(&self, uuid: Uuid, nid: Nid) -> Result<()> {
        match self.map.entry(uuid) {
            Entry::Occupied(entry) if *entry.get() == nid => Ok(()),
            Entry::Occupied(entry) => Err(Error::IdentityConflict {
                uuid,
                existing: *entry.get(),
                requested: nid,
            }),
            Entry::Vacant(entry) => {
                reserve(&self.next_nid, nid)?;
                entry.insert(nid);
                self.reverse.record_additional(nid, uuid);
                Ok(())
            }
        }
    }

    fn get_or_assign_all(&self, uuids: &[Uuid]) -> Result<Nid> {
        let first = uuids
            .first()
            .ok_or_else(|| Error::invalid_input("no UUIDs given"))?;
        let known = uuids.iter().find_map(|uuid| self.get(uuid));
        let nid = match known {
            Some(nid) => nid,
            None => self.get_or_assign(*first)?,
        };
        for uuid in uuids {
            self.put(*uuid, nid)?;
        }
        Ok(nid)
    }

    fn contains_value(&self, nid: Nid) -> bool {
        if self.reverse.lookup(nid).is_some() {
            return true;
        }
        self.map.iter().any(|entry| *entry.value() == nid)
    }

    fn uuids_for(&self, nid: Nid) -> Vec<Uuid> {
        if let Some(uuids) = self.reverse.lookup(nid) {
            return uuids;
        }
        let seen = self.reverse.generation();
        let uuids: Vec<Uuid> = self
            .map
            .iter()
            .filter(|entry| *entry.value() == nid)
            .map(|entry| *entry.key())
            .collect();
        self.reverse.record_scan(nid, &uuids, seen);
        uuids
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn next_nid(&self) -> Nid {
        Nid::new(self.next_nid.load(Ordering::Acquire))
    }

    fn entries(&self) -> Vec<(Uuid, Nid)> {
        self.map
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    fn begin_bulk_load(&self) {
        self.reverse.enable();
    }

    fn end_bulk_load(&self) {
        self.reverse.disable();
    }
}
