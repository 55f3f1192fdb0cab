//! Root of the store graph plus the system-wide async request counter

use crate::maintainer::MaintainerRegistry;
use crate::metrics::UsageStatsNode;
use crate::store::CacheStore;
use ddc_core::{LegacyCacheKey, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

pub struct CacheBackend {
    root: Arc<dyn CacheStore>,
    graph_name: String,
    max_key_length: usize,
    registry: Arc<MaintainerRegistry>,
    async_requests: Mutex<i64>,
    quiescent: Condvar,
}

impl CacheBackend {
    /// Wrap the root store; maintainers of every store in the graph are
    /// registered here, once.
    pub fn new(root: Arc<dyn CacheStore>, graph_name: impl Into<String>, max_key_length: usize) -> Self {
        let registry = Arc::new(MaintainerRegistry::new());
        root.register_maintainers(&registry);
        let graph_name = graph_name.into();
        tracing::info!(
            graph = %graph_name,
            maintainers = registry.len(),
            "derived data cache backend ready"
        );
        Self {
            root,
            graph_name,
            max_key_length,
            registry,
            async_requests: Mutex::new(0),
            quiescent: Condvar::new(),
        }
    }

    pub fn root(&self) -> &Arc<dyn CacheStore> {
        &self.root
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    pub fn maintainer_registry(&self) -> &Arc<MaintainerRegistry> {
        &self.registry
    }

    /// Legacy key bounded by this backend's maximum key length
    pub fn legacy_key(&self, full_key: impl Into<String>) -> Result<LegacyCacheKey> {
        LegacyCacheKey::new(full_key, self.max_key_length)
    }

    pub fn usage_stats(&self) -> UsageStatsNode {
        self.root.usage_stats()
    }

    /// True if any leaf store is remote
    pub fn using_shared_cache(&self) -> bool {
        self.usage_stats().leaves().iter().any(|node| !node.is_local)
    }

    /// Incremented before an async request is dispatched and decremented
    /// after it reaches a terminal state
    pub fn add_to_async_completion_counter(&self, delta: i64) {
        let mut count = self.async_requests.lock();
        *count += delta;
        if *count < 0 {
            tracing::warn!(count = *count, "async completion counter went negative");
            *count = 0;
        }
        if *count == 0 {
            self.quiescent.notify_all();
        }
    }

    pub fn any_async_requests_remaining(&self) -> bool {
        *self.async_requests.lock() > 0
    }

    /// Block until no async request is outstanding
    pub fn wait_for_quiescence(&self, shutdown: bool) {
        let mut count = self.async_requests.lock();
        if *count > 0 {
            tracing::debug!(outstanding = *count, shutdown, "waiting for cache quiescence");
        }
        while *count > 0 {
            self.quiescent.wait(&mut count);
        }
        if shutdown {
            tracing::info!(graph = %self.graph_name, "derived data cache quiescent for shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HierarchicalCacheStore, MemoryCacheStore, StoreLocation};
    use std::time::Duration;

    fn backend(remote: bool) -> Arc<CacheBackend> {
        let mut children: Vec<Arc<dyn CacheStore>> =
            vec![Arc::new(MemoryCacheStore::new("local", StoreLocation::Local))];
        if remote {
            children.push(Arc::new(MemoryCacheStore::new("remote", StoreLocation::Remote)));
        }
        let root = Arc::new(HierarchicalCacheStore::new("root", children));
        Arc::new(CacheBackend::new(root, "Test", 64))
    }

    #[test]
    fn test_counter_and_quiescence() {
        let backend = backend(false);
        assert!(!backend.any_async_requests_remaining());
        backend.add_to_async_completion_counter(2);
        assert!(backend.any_async_requests_remaining());

        let worker = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                backend.add_to_async_completion_counter(-1);
                backend.add_to_async_completion_counter(-1);
            })
        };
        backend.wait_for_quiescence(true);
        assert!(!backend.any_async_requests_remaining());
        worker.join().unwrap();
    }

    #[test]
    fn test_using_shared_cache() {
        assert!(!backend(false).using_shared_cache());
        assert!(backend(true).using_shared_cache());
    }

    #[test]
    fn test_legacy_key_uses_max_length() {
        let key = backend(false).legacy_key("K".repeat(100)).unwrap();
        assert_eq!(key.short_key().len(), 64);
    }
}
