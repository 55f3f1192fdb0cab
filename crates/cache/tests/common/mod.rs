//! Shared fixtures for the cache integration tests

#![allow(dead_code)]

use ddc_cache::{
    CacheConfig, CacheConfigBuilder, CacheStore, CacheType, DataDeriver, DerivedDataCache,
    HierarchicalCacheStore, MemoryCacheStore, OnComplete, RequestOwner, StoreLocation,
    UsageStatsNode,
};
use bytes::Bytes;
use ddc_core::{
    CacheValue, GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest,
    GetValueResponse, LegacyDeleteRequest, LegacyDeleteResponse, LegacyGetRequest,
    LegacyGetResponse, LegacyPutRequest, LegacyPutResponse, PutRequest, PutResponse,
    PutValueRequest, PutValueResponse, Status,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::ThreadId;

static TRACING: Once = Once::new();

/// Install a fmt subscriber once, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builder for a cache over a local and optional shared memory store
pub struct TestCacheBuilder {
    verify: bool,
    shared: bool,
    worker_threads: usize,
    root: Option<Arc<dyn CacheStore>>,
}

pub struct TestCache {
    pub cache: DerivedDataCache,
    pub local: Arc<MemoryCacheStore>,
    pub shared: Option<Arc<MemoryCacheStore>>,
}

impl TestCacheBuilder {
    pub fn new() -> Self {
        Self {
            verify: false,
            shared: false,
            worker_threads: 4,
            root: None,
        }
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_shared_store(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Replace the memory graph with a custom root store
    pub fn with_root(mut self, root: Arc<dyn CacheStore>) -> Self {
        self.root = Some(root);
        self
    }

    pub fn config(&self) -> CacheConfig {
        CacheConfigBuilder::new()
            .with_verify(self.verify)
            .with_worker_threads(self.worker_threads)
            .with_graph_name("Test")
            .build()
            .unwrap()
    }

    pub fn build(self) -> TestCache {
        init_tracing();
        let config = self.config();
        let local = Arc::new(
            MemoryCacheStore::new("Local", StoreLocation::Local)
                .with_cache_type(CacheType::FileSystem)
                .with_transient(true),
        );
        let shared = self.shared.then(|| {
            Arc::new(
                MemoryCacheStore::new("Shared", StoreLocation::Remote)
                    .with_cache_type(CacheType::FileSystem),
            )
        });
        let root = self.root.unwrap_or_else(|| {
            let mut children: Vec<Arc<dyn CacheStore>> = vec![local.clone()];
            if let Some(shared) = &shared {
                children.push(shared.clone());
            }
            Arc::new(HierarchicalCacheStore::new("Root", children))
        });
        TestCache {
            cache: DerivedDataCache::new(&config, root).unwrap(),
            local,
            shared,
        }
    }
}

/// What a [`CountingDeriver`] returns from `build`
#[derive(Clone)]
pub enum BuildOutput {
    Data(Vec<u8>),
    Fail,
}

/// Deriver that counts its builds and records the building thread
#[derive(Clone)]
pub struct CountingDeriver {
    pub suffix: String,
    pub output: BuildOutput,
    pub threadsafe: bool,
    pub deterministic: bool,
    pub builds: Arc<AtomicUsize>,
    pub build_threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl CountingDeriver {
    pub fn new(suffix: &str, data: &[u8]) -> Self {
        Self {
            suffix: suffix.to_string(),
            output: BuildOutput::Data(data.to_vec()),
            threadsafe: true,
            deterministic: false,
            builds: Arc::new(AtomicUsize::new(0)),
            build_threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(suffix: &str) -> Self {
        Self {
            output: BuildOutput::Fail,
            ..Self::new(suffix, b"")
        }
    }

    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    pub fn not_threadsafe(mut self) -> Self {
        self.threadsafe = false;
        self
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn boxed(&self) -> Box<dyn DataDeriver> {
        Box::new(self.clone())
    }
}

impl DataDeriver for CountingDeriver {
    fn plugin_name(&self) -> &str {
        "TEST"
    }

    fn version_string(&self) -> &str {
        "1"
    }

    fn plugin_specific_cache_key_suffix(&self) -> String {
        self.suffix.clone()
    }

    fn debug_context(&self) -> String {
        format!("test asset {}", self.suffix)
    }

    fn is_build_threadsafe(&self) -> bool {
        self.threadsafe
    }

    fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    fn build(&mut self) -> anyhow::Result<Vec<u8>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.build_threads.lock().push(std::thread::current().id());
        match &self.output {
            BuildOutput::Data(data) => Ok(data.clone()),
            BuildOutput::Fail => Err(anyhow::anyhow!("build failed for {}", self.suffix)),
        }
    }
}

/// A latch tests open to release held requests
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

/// Store that holds every answer until its gate opens
///
/// Gets miss unless a legacy hit was configured; puts always succeed.
pub struct GatedStore {
    pub gate: Arc<Gate>,
    pub gets: Arc<AtomicUsize>,
    legacy_hit: Option<Bytes>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Gate::default()),
            gets: Arc::new(AtomicUsize::new(0)),
            legacy_hit: None,
        }
    }

    /// Answer every legacy get with `data` instead of a miss
    pub fn with_legacy_hit(mut self, data: &[u8]) -> Self {
        self.legacy_hit = Some(Bytes::copy_from_slice(data));
        self
    }

    /// Answer every request on a task that waits for the gate
    fn answer<R, S>(
        &self,
        requests: &[R],
        owner: &RequestOwner,
        on_complete: OnComplete<S>,
        respond: impl Fn(&R) -> S + Send + 'static,
    ) where
        R: Clone + Send + 'static,
        S: Send + 'static,
    {
        let requests = requests.to_vec();
        let gate = self.gate.clone();
        owner.launch_task("gated", move || {
            gate.wait();
            for request in &requests {
                on_complete(respond(request));
            }
        });
    }
}

impl CacheStore for GatedStore {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner, on_complete: OnComplete<PutResponse>) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Ok));
    }

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner, on_complete: OnComplete<GetResponse>) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Error));
    }

    fn put_value(
        &self,
        requests: &[PutValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<PutValueResponse>,
    ) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Ok));
    }

    fn get_value(
        &self,
        requests: &[GetValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetValueResponse>,
    ) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Error));
    }

    fn get_chunks(
        &self,
        requests: &[GetChunkRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetChunkResponse>,
    ) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Error));
    }

    fn legacy_put(
        &self,
        requests: &[LegacyPutRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyPutResponse>,
    ) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Ok));
    }

    fn legacy_get(
        &self,
        requests: &[LegacyGetRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyGetResponse>,
    ) {
        self.gets.fetch_add(requests.len(), Ordering::SeqCst);
        let hit = self.legacy_hit.clone();
        self.answer(requests, owner, on_complete, move |r| match &hit {
            Some(data) => {
                let mut response = r.make_response(Status::Ok);
                response.value = Some(CacheValue::new(data.clone()));
                response
            }
            None => r.make_response(Status::Error),
        });
    }

    fn legacy_delete(
        &self,
        requests: &[LegacyDeleteRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyDeleteResponse>,
    ) {
        self.answer(requests, owner, on_complete, |r| r.make_response(Status::Error));
    }

    fn usage_stats(&self) -> UsageStatsNode {
        UsageStatsNode::new(CacheType::Other, "Gated", true)
    }
}
