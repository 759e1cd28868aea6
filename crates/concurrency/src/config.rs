//! Slot store configuration

use serde::{Deserialize, Serialize};
use tessera_core::{Error, Result};

/// Sizing and contention limits for a [`crate::SlotStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotStoreConfig {
    /// Slots per segment (and per segment file)
    pub elements_per_segment: u32,
    /// Upper bound on segments; sequences beyond
    /// `elements_per_segment * max_segments` are rejected
    pub max_segments: u32,
    /// Merge-then-CAS attempts before a put gives up
    pub max_merge_retries: usize,
    /// Payload schema version recorded in the store sidecar
    pub schema_version: u32,
}

impl Default for SlotStoreConfig {
    fn default() -> Self {
        SlotStoreConfig {
            elements_per_segment: 1024,
            max_segments: 4096,
            max_merge_retries: 64,
            schema_version: 1,
        }
    }
}

impl SlotStoreConfig {
    /// Reject unusable values
    pub fn validate(&self) -> Result<()> {
        if self.elements_per_segment == 0 {
            return Err(Error::invalid_input("slots.elements_per_segment must be > 0"));
        }
        if self.max_segments == 0 {
            return Err(Error::invalid_input("slots.max_segments must be > 0"));
        }
        if self.max_merge_retries == 0 {
            return Err(Error::invalid_input("slots.max_merge_retries must be > 0"));
        }
        if (self.elements_per_segment as u64) * (self.max_segments as u64) > u32::MAX as u64 + 1 {
            return Err(Error::invalid_input(
                "slots.elements_per_segment * slots.max_segments exceeds the sequence space",
            ));
        }
        Ok(())
    }

    /// Number of addressable slots
    pub fn capacity(&self) -> u64 {
        self.elements_per_segment as u64 * self.max_segments as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SlotStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity(), 1024 * 4096);
    }

    #[test]
    fn test_zero_values_rejected() {
        for config in [
            SlotStoreConfig {
                elements_per_segment: 0,
                ..Default::default()
            },
            SlotStoreConfig {
                max_segments: 0,
                ..Default::default()
            },
            SlotStoreConfig {
                max_merge_retries: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
        }
    }

    #[test]
    fn test_oversized_address_space_rejected() {
        let config = SlotStoreConfig {
            elements_per_segment: 1 << 20,
            max_segments: 1 << 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
