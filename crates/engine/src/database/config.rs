//! Database configuration via `tessera.toml`
//!
//! On first open a commented default `tessera.toml` is written into the
//! database directory. To change settings, edit the file and reopen.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_concurrency::SlotStoreConfig;
use tessera_core::{Error, Result};
use tessera_storage::ProbeMapConfig;

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Which identifier map implementation backs the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierBackend {
    /// Open-addressing probe table behind a sequence lock
    #[default]
    Probe,
    /// Sharded concurrent hash map
    Concurrent,
}

/// `[identifiers]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    /// Map implementation
    pub backend: IdentifierBackend,
    /// Starting table capacity (rounded up to a prime)
    pub initial_capacity: usize,
    /// Grow when live plus removed slots exceed this share of capacity
    pub max_load_factor: f64,
    /// Shrink when live slots fall below this share of capacity
    pub min_load_factor: f64,
    /// Entries kept in the NID → UUID cache; 0 disables it
    pub reverse_cache_capacity: usize,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        let probe = ProbeMapConfig::default();
        IdentifierConfig {
            backend: IdentifierBackend::Probe,
            initial_capacity: probe.initial_capacity,
            max_load_factor: probe.max_load_factor,
            min_load_factor: probe.min_load_factor,
            reverse_cache_capacity: 65_536,
        }
    }
}

impl IdentifierConfig {
    /// Probe table settings
    pub fn probe_map(&self) -> ProbeMapConfig {
        ProbeMapConfig {
            initial_capacity: self.initial_capacity,
            max_load_factor: self.max_load_factor,
            min_load_factor: self.min_load_factor,
        }
    }
}

/// `[resolver]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResolverConfig {
    /// Fail latest-version queries when two distinct stamps share a path
    /// and time, instead of logging and keeping both
    pub strict_equal_time: bool,
}

/// Database configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// [identifiers]
/// backend = "probe"
/// initial_capacity = 1021
///
/// [slots]
/// elements_per_segment = 1024
///
/// [resolver]
/// strict_equal_time = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TesseraConfig {
    /// Identifier map settings
    pub identifiers: IdentifierConfig,
    /// Slot store settings, shared by every component store
    pub slots: SlotStoreConfig,
    /// Path resolver settings
    pub resolver: ResolverConfig,
}

impl TesseraConfig {
    /// Check every section.
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        self.identifiers.probe_map().validate()?;
        self.slots.validate()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera database configuration

[identifiers]
# "probe" (open addressing, optimistic reads) or "concurrent" (sharded map)
backend = "probe"
# Starting table capacity, rounded up to a prime
initial_capacity = 1021
# Rehash once live plus removed slots pass this share of capacity
max_load_factor = 0.5
# Shrink once live slots fall below this share of capacity
min_load_factor = 0.1
# NID -> UUID lookups cached; 0 disables the cache
reverse_cache_capacity = 65536

[slots]
# Slots per segment file
elements_per_segment = 1024
# Largest sequence is elements_per_segment * max_segments - 1
max_segments = 4096
# Merge attempts before a contended write fails
max_merge_retries = 64
# Bump when the chronology encoding changes
schema_version = 1

[resolver]
# true: two distinct stamps with the same path and time fail the query
# false: they are logged and both kept
strict_equal_time = false
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TesseraConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let parsed: TesseraConfig = toml::from_str(TesseraConfig::default_toml()).unwrap();
        assert_eq!(parsed, TesseraConfig::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        TesseraConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        let config = TesseraConfig::from_file(&path).unwrap();
        assert!(!config.resolver.strict_equal_time);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[resolver]\nstrict_equal_time = true\n").unwrap();

        TesseraConfig::write_default_if_missing(&path).unwrap();
        let config = TesseraConfig::from_file(&path).unwrap();
        assert!(config.resolver.strict_equal_time);
        assert_eq!(config.slots, SlotStoreConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        assert_eq!(TesseraConfig::from_file(&path).unwrap(), TesseraConfig::default());
    }

    #[test]
    fn invalid_values_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "[identifiers]\nmax_load_factor = 1.5\n").unwrap();
        assert!(matches!(TesseraConfig::from_file(&path), Err(Error::InvalidInput(_))));

        std::fs::write(&path, "[slots]\nelements_per_segment = 0\n").unwrap();
        assert!(matches!(TesseraConfig::from_file(&path), Err(Error::InvalidInput(_))));

        std::fs::write(&path, "[identifiers]\nbackend = \"btree\"\n").unwrap();
        assert!(matches!(TesseraConfig::from_file(&path), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = TesseraConfig::default();
        config.identifiers.backend = IdentifierBackend::Concurrent;
        config.slots.elements_per_segment = 64;
        config.write_to_file(&path).unwrap();
        assert_eq!(TesseraConfig::from_file(&path).unwrap(), config);
    }
}
