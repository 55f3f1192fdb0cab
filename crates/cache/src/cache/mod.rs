//! The derived data cache facade
//!
//! [`DerivedDataCache`] puts two API generations over one store graph:
//!
//! - the batch API (`put`, `get`, `put_value`, `get_value`, `get_chunks`),
//!   which forwards to the root store with the caller's owner
//! - the legacy string-keyed API, built on
//!   [`LegacyFetchOrBuildTask`](crate::legacy::LegacyFetchOrBuildTask) and a
//!   handle table for the asynchronous calls

mod legacy_api;
mod statistics;

pub use legacy_api::ExistenceBits;

use crate::config::CacheConfig;
use crate::context::CacheContext;
use crate::legacy::{HandleTable, LegacyFetchOrBuildTask};
use crate::maintainer::CacheMaintainer;
use crate::owner::{Priority, RequestOwner};
use crate::store::{noop_completion, CacheStore, OnComplete};
use ddc_core::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest,
    GetValueResponse, PutRequest, PutResponse, PutValueRequest, PutValueResponse, Result,
};
use std::sync::Arc;

/// Thread-safe entry point to the cache
pub struct DerivedDataCache {
    context: Arc<CacheContext>,
    pending_tasks: HandleTable<Arc<LegacyFetchOrBuildTask>>,
    maintainer: CacheMaintainer,
}

impl DerivedDataCache {
    /// Build the engine over `root`; `config` is read once, here
    pub fn new(config: &CacheConfig, root: Arc<dyn CacheStore>) -> Result<Self> {
        let context = Arc::new(CacheContext::new(root, config)?);
        let maintainer = CacheMaintainer::new(context.backend().maintainer_registry().clone());
        tracing::info!(
            graph = %context.backend().graph_name(),
            worker_threads = context.worker_threads(),
            verify = context.verify(),
            source = ?config.source,
            "derived data cache created"
        );
        Ok(Self {
            context,
            pending_tasks: HandleTable::new(),
            maintainer,
        })
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// An owner for batch requests, backed by the cache's worker pool
    pub fn new_owner(&self, priority: Priority) -> RequestOwner {
        self.context.new_owner(priority)
    }

    fn root(&self) -> &dyn CacheStore {
        self.context.backend().root().as_ref()
    }

    pub fn put(
        &self,
        requests: &[PutRequest],
        owner: &RequestOwner,
        on_complete: Option<OnComplete<PutResponse>>,
    ) {
        self.root()
            .put(requests, owner, on_complete.unwrap_or_else(noop_completion));
    }

    pub fn get(
        &self,
        requests: &[GetRequest],
        owner: &RequestOwner,
        on_complete: Option<OnComplete<GetResponse>>,
    ) {
        self.root()
            .get(requests, owner, on_complete.unwrap_or_else(noop_completion));
    }

    pub fn put_value(
        &self,
        requests: &[PutValueRequest],
        owner: &RequestOwner,
        on_complete: Option<OnComplete<PutValueResponse>>,
    ) {
        self.root()
            .put_value(requests, owner, on_complete.unwrap_or_else(noop_completion));
    }

    pub fn get_value(
        &self,
        requests: &[GetValueRequest],
        owner: &RequestOwner,
        on_complete: Option<OnComplete<GetValueResponse>>,
    ) {
        self.root()
            .get_value(requests, owner, on_complete.unwrap_or_else(noop_completion));
    }

    pub fn get_chunks(
        &self,
        requests: &[GetChunkRequest],
        owner: &RequestOwner,
        on_complete: Option<OnComplete<GetChunkResponse>>,
    ) {
        self.root()
            .get_chunks(requests, owner, on_complete.unwrap_or_else(noop_completion));
    }

    pub fn add_to_async_completion_counter(&self, delta: i64) {
        self.context.backend().add_to_async_completion_counter(delta);
    }

    pub fn any_async_requests_remaining(&self) -> bool {
        self.context.backend().any_async_requests_remaining()
    }

    /// Block until no request is in flight
    ///
    /// Unretrieved async requests are waited on first, so a build deferred
    /// to a waiting thread runs here instead of holding the counter up.
    /// Their results stay available to `get_asynchronous_results`.
    pub fn wait_for_quiescence(&self, shutdown: bool) {
        for task in self.pending_tasks.snapshot() {
            task.wait();
        }
        self.context.backend().wait_for_quiescence(shutdown);
    }

    pub fn graph_name(&self) -> &str {
        self.context.backend().graph_name()
    }

    pub fn using_shared_cache(&self) -> bool {
        self.context.backend().using_shared_cache()
    }
}

impl Drop for DerivedDataCache {
    fn drop(&mut self) {
        let outstanding = self.pending_tasks.drain();
        if !outstanding.is_empty() {
            tracing::debug!(count = outstanding.len(), "draining unretrieved async requests");
        }
        for (_, task) in outstanding {
            task.wait();
        }
        self.wait_for_quiescence(true);
    }
}

impl std::fmt::Debug for DerivedDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedDataCache")
            .field("graph", &self.graph_name())
            .field("pending_tasks", &self.pending_tasks.len())
            .finish()
    }
}
