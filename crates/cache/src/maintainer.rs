//! Background maintenance signals
//!
//! Stores that run background work (compaction, eviction scans) register a
//! [`CacheStoreMaintainer`] with the [`MaintainerRegistry`]. The cache
//! exposes them together as one [`CacheMaintainer`].

use parking_lot::RwLock;
use std::sync::Arc;

pub trait CacheStoreMaintainer: Send + Sync {
    /// True when the store has no background work pending
    fn is_idle(&self) -> bool;

    /// Ask the store to run its background work at a higher priority
    fn boost_priority(&self);
}

/// Registered maintainers, in registration order
#[derive(Default)]
pub struct MaintainerRegistry {
    maintainers: RwLock<Vec<Arc<dyn CacheStoreMaintainer>>>,
}

impl MaintainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, maintainer: Arc<dyn CacheStoreMaintainer>) {
        self.maintainers.write().push(maintainer);
        tracing::debug!("registered cache store maintainer");
    }

    pub fn maintainers(&self) -> Vec<Arc<dyn CacheStoreMaintainer>> {
        self.maintainers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.maintainers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every registered maintainer behind a single idle/boost pair
#[derive(Clone)]
pub struct CacheMaintainer {
    registry: Arc<MaintainerRegistry>,
}

impl CacheMaintainer {
    pub fn new(registry: Arc<MaintainerRegistry>) -> Self {
        Self { registry }
    }

    /// True when every maintainer is idle, including when none are registered
    pub fn is_idle(&self) -> bool {
        self.registry.maintainers().iter().all(|m| m.is_idle())
    }

    pub fn boost_priority(&self) {
        for maintainer in self.registry.maintainers() {
            maintainer.boost_priority();
        }
    }

    pub fn registry(&self) -> &Arc<MaintainerRegistry> {
        &self.registry
    }
}
