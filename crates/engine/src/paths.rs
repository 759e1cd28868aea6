//! Path origin metadata
//!
//! A path is a branch of history. Each path declares the positions it was
//! branched from: one origin for an ordinary branch, several for a merge,
//! none for a root path.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{Error, Nid, Result, StampPosition};

/// Answers which positions a path was branched from.
pub trait PathService: Send + Sync {
    /// Declared origins of `path`, `None` if the path is unknown
    fn origins(&self, path: Nid) -> Option<Vec<StampPosition>>;
}

/// In-process path registry
#[derive(Default)]
pub struct PathRegistry {
    origins: DashMap<Nid, Vec<StampPosition>>,
}

impl PathRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `path` with its origins.
    ///
    /// Declaring a path again with the same origins is a no-op. Origins
    /// are not checked for cycles here; a cyclic graph is rejected when a
    /// resolver walks it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the path names itself as an origin or was already
    /// declared with different origins.
    pub fn add_path(&self, path: Nid, origins: Vec<StampPosition>) -> Result<()> {
        if origins.iter().any(|origin| origin.path == path) {
            return Err(Error::invalid_input(format!("{path} cannot originate from itself")));
        }
        let mut origins = origins;
        origins.sort();
        origins.dedup();

        match self.origins.entry(path) {
            Entry::Occupied(entry) if *entry.get() == origins => Ok(()),
            Entry::Occupied(_) => Err(Error::invalid_input(format!(
                "{path} is already declared with different origins"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(origins);
                Ok(())
            }
        }
    }

    /// Whether `path` has been declared
    pub fn contains(&self, path: Nid) -> bool {
        self.origins.contains_key(&path)
    }

    /// Number of declared paths
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Whether no path has been declared
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Every path and its origins, ordered by path
    pub fn entries(&self) -> Vec<(Nid, Vec<StampPosition>)> {
        let mut entries: Vec<(Nid, Vec<StampPosition>)> = self
            .origins
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(path, _)| *path);
        entries
    }
}

impl PathService for PathRegistry {
    fn origins(&self, path: Nid) -> Option<Vec<StampPosition>> {
        self.origins.get(&path).map(|origins| origins.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let registry = PathRegistry::new();
        registry.add_path(Nid::new(1), vec![]).unwrap();
        registry
            .add_path(Nid::new(2), vec![StampPosition::new(Nid::new(1), 150)])
            .unwrap();

        assert_eq!(registry.origins(Nid::new(1)), Some(vec![]));
        assert_eq!(
            registry.origins(Nid::new(2)),
            Some(vec![StampPosition::new(Nid::new(1), 150)])
        );
        assert!(registry.origins(Nid::new(3)).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_redeclaration() {
        let registry = PathRegistry::new();
        let origin = StampPosition::new(Nid::new(1), 10);
        registry.add_path(Nid::new(2), vec![origin]).unwrap();
        assert!(registry.add_path(Nid::new(2), vec![origin, origin]).is_ok());
        assert!(registry
            .add_path(Nid::new(2), vec![StampPosition::new(Nid::new(1), 11)])
            .is_err());
    }

    #[test]
    fn test_self_origin_rejected() {
        let registry = PathRegistry::new();
        let err = registry
            .add_path(Nid::new(4), vec![StampPosition::new(Nid::new(4), 1)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!registry.contains(Nid::new(4)));
    }
}
