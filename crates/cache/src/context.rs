//! Engine context shared by every component

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::metrics::ResourceStats;
use crate::owner::{Priority, RequestOwner};
use crate::pool::WorkerPool;
use crate::store::CacheStore;
use ddc_core::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A verify-mode rebuild that disagreed with the cached bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyMismatch {
    pub key: String,
    pub plugin: String,
    pub asset: String,
    pub bytes_in_cache: usize,
    pub bytes_generated: usize,
    /// First differing byte, or the shorter length when one is a prefix
    pub offset: usize,
}

/// Called once per mismatch, on whichever thread ran the verify build
pub type VerifyMismatchHook = Arc<dyn Fn(&VerifyMismatch) + Send + Sync>;

/// State fixed at construction: the store graph, the worker pool and the
/// verify switch. Shared by `Arc`; nothing here is global.
pub struct CacheContext {
    backend: CacheBackend,
    pool: WorkerPool,
    verify: bool,
    resource_stats: ResourceStats,
    verify_mismatches: AtomicU64,
    mismatch_hook: RwLock<Option<VerifyMismatchHook>>,
}

impl CacheContext {
    pub fn new(root: Arc<dyn CacheStore>, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_threads)?;
        if config.verify {
            tracing::info!("verify mode enabled: every hit is rebuilt and compared");
        }
        Ok(Self {
            backend: CacheBackend::new(root, config.graph_name.clone(), config.max_key_length),
            pool,
            verify: config.verify,
            resource_stats: ResourceStats::new(),
            verify_mismatches: AtomicU64::new(0),
            mismatch_hook: RwLock::new(None),
        })
    }

    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn resource_stats(&self) -> &ResourceStats {
        &self.resource_stats
    }

    pub fn new_owner(&self, priority: Priority) -> RequestOwner {
        RequestOwner::new(self.pool.handle(), priority)
    }

    /// Install the hook run on every verify mismatch, replacing any previous one
    pub fn set_verify_mismatch_hook(&self, hook: VerifyMismatchHook) {
        *self.mismatch_hook.write() = Some(hook);
    }

    /// Count the mismatch and hand it to the installed hook
    pub fn report_verify_mismatch(&self, mismatch: &VerifyMismatch) {
        self.verify_mismatches.fetch_add(1, Ordering::Relaxed);
        let hook = self.mismatch_hook.read().clone();
        if let Some(hook) = hook {
            hook(mismatch);
        }
    }

    pub fn verify_mismatch_count(&self) -> u64 {
        self.verify_mismatches.load(Ordering::Relaxed)
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.thread_count()
    }
}
