//! Coordinate-keyed resolver cache

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use tessera_core::{Result, StampCoordinate};

use super::PathResolver;
use crate::authority::StampService;
use crate::paths::PathService;

/// Memo of one [`PathResolver`] per coordinate.
///
/// Resolvers are never evicted individually. When path metadata changes,
/// [`ResolverCache::invalidate`] drops every cached resolver at once.
pub struct ResolverCache {
    paths: Arc<dyn PathService>,
    stamps: Arc<dyn StampService>,
    strict_equal_time: bool,
    resolvers: DashMap<StampCoordinate, Arc<PathResolver>>,
}

impl ResolverCache {
    /// Cache building resolvers over `paths` and `stamps`
    pub fn new(
        paths: Arc<dyn PathService>,
        stamps: Arc<dyn StampService>,
        strict_equal_time: bool,
    ) -> Self {
        ResolverCache {
            paths,
            stamps,
            strict_equal_time,
            resolvers: DashMap::new(),
        }
    }

    /// Resolver for `coordinate`, building it on first request.
    ///
    /// Two threads missing together may both build; only the first result
    /// is kept and both callers receive it.
    pub fn get(&self, coordinate: &StampCoordinate) -> Result<Arc<PathResolver>> {
        if let Some(resolver) = self.resolvers.get(coordinate) {
            return Ok(Arc::clone(resolver.value()));
        }

        let built = PathResolver::new(
            coordinate.clone(),
            self.paths.as_ref(),
            Arc::clone(&self.stamps),
        )?
        .with_strict_equal_time(self.strict_equal_time);

        let entry = self
            .resolvers
            .entry(coordinate.clone())
            .or_insert_with(|| Arc::new(built));
        Ok(Arc::clone(entry.value()))
    }

    /// Number of cached resolvers
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Drop every cached resolver
    pub fn invalidate(&self) {
        let dropped = self.resolvers.len();
        self.resolvers.clear();
        info!(dropped, "resolver cache invalidated");
    }
}
