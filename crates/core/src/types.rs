//! Core identity types for Tessera
//!
//! This module defines the foundational identifiers:
//! - Nid: dense integer identity assigned once per component
//! - Sequence: dense per-type index derived from a Nid, used as a store slot
//! - StampSequence: identifier of a minted Stamp
//! - Status: lifecycle state recorded in a Stamp

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense integer identity for a component instance.
///
/// Assigned once, never reused or reassigned. The first assigned NID is
/// [`Nid::FIRST`]; zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nid(u32);

impl Nid {
    /// First NID handed out by an empty identifier map
    pub const FIRST: Nid = Nid(1);

    /// Wrap a raw NID value
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Nid(raw)
    }

    /// Raw NID value
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid:{}", self.0)
    }
}

/// Dense positive index scoped to one component type.
///
/// Sequences start at [`Sequence::FIRST`] and are gapless per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u32);

impl Sequence {
    /// First sequence allocated for a component type
    pub const FIRST: Sequence = Sequence(1);

    /// Wrap a raw sequence value
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Sequence(raw)
    }

    /// Raw sequence value
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Slot index as `usize`
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a minted, immutable Stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StampSequence(u32);

impl StampSequence {
    /// First stamp sequence minted by an empty authority
    pub const FIRST: StampSequence = StampSequence(1);

    /// Wrap a raw stamp sequence
    #[inline]
    pub const fn new(raw: u32) -> Self {
        StampSequence(raw)
    }

    /// Raw stamp sequence
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StampSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stamp:{}", self.0)
    }
}

/// Lifecycle state carried by a Stamp.
///
/// Deactivation is expressed by appending an `Inactive` version, never by
/// physically removing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Version is in force
    Active,
    /// Version retires the component
    Inactive,
    /// Version was withdrawn before release
    Cancelled,
    /// Bootstrap version predating any real history
    Primordial,
}

impl Status {
    /// Whether this status counts as active for active-only queries
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, Status::Active)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Cancelled => "cancelled",
            Status::Primordial => "primordial",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nid_roundtrip_and_order() {
        let a = Nid::new(5);
        let b = Nid::new(9);
        assert_eq!(a.get(), 5);
        assert!(a < b);
        assert_eq!(a.to_string(), "nid:5");
        assert_eq!(Nid::FIRST.get(), 1);
    }

    #[test]
    fn test_sequence_index() {
        let seq = Sequence::new(1024);
        assert_eq!(seq.index(), 1024usize);
        assert_eq!(seq.to_string(), "1024");
        assert_eq!(Sequence::FIRST.get(), 1);
    }

    #[test]
    fn test_status_is_active() {
        assert!(Status::Active.is_active());
        assert!(!Status::Inactive.is_active());
        assert!(!Status::Cancelled.is_active());
        assert!(!Status::Primordial.is_active());
        assert_eq!(Status::Inactive.to_string(), "inactive");
    }
}
