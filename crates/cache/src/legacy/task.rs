//! Fetch-or-build for a single legacy key
//!
//! The task moves through get, an optional build, and an optional write-back:
//!
//! ```text
//! begin_get ──► end_get ──► begin_build ──► execute_build ──► end_build ──► end_task
//!                  │                                              │
//!                  └──────────────► end_task                      └──► begin_async_put
//! ```
//!
//! `end_get` is reached from two places: the store's completion callback and
//! the thread that issued the get. A two-permit countdown makes sure only
//! whichever of them arrives second continues. When the caller's thread is
//! the one that continues, a build that is not thread-safe can run inline;
//! otherwise it is deferred until [`LegacyFetchOrBuildTask::wait`].

use crate::context::{CacheContext, VerifyMismatch};
use crate::deriver::DataDeriver;
use crate::metrics::asset_type_from_key;
use crate::owner::{OwnerHandle, Priority, RequestOwner};
use crate::store::OnComplete;
use bytes::Bytes;
use ddc_core::{
    CacheValue, LegacyCacheKey, LegacyGetRequest, LegacyGetResponse, LegacyPutRequest,
    LegacyPutResponse, Status,
};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    Normal,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildThread {
    Unknown,
    Caller,
}

/// Outcome of a legacy fetch-or-build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyGetResult {
    pub status: Status,
    /// Empty unless `status` is `Ok`
    pub data: Vec<u8>,
    /// True when the data came from the deriver rather than a store
    pub data_was_built: bool,
    /// True when verify mode rebuilt the data and it differed from the store
    pub verify_mismatch: bool,
}

struct TaskState {
    status: Status,
    data: Bytes,
    data_was_built: bool,
    verify_mismatch: bool,
    deferred_build: Option<BuildMode>,
    deriver: Option<Box<dyn DataDeriver>>,
}

struct TaskShared {
    context: Arc<CacheContext>,
    name: String,
    key: LegacyCacheKey,
    asset_type: String,
    owner: OwnerHandle,
    started: Instant,
    continue_counter: AtomicU8,
    state: Mutex<TaskState>,
}

pub struct LegacyFetchOrBuildTask {
    shared: Arc<TaskShared>,
    owner: RequestOwner,
}

impl LegacyFetchOrBuildTask {
    pub fn new(
        context: Arc<CacheContext>,
        name: impl Into<String>,
        key: LegacyCacheKey,
        deriver: Option<Box<dyn DataDeriver>>,
        priority: Priority,
    ) -> Self {
        let owner = context.new_owner(priority);
        let asset_type = match &deriver {
            Some(deriver) => deriver.plugin_name().to_string(),
            None => asset_type_from_key(key.full_key()).to_string(),
        };
        let shared = Arc::new(TaskShared {
            context,
            name: name.into(),
            key,
            asset_type,
            owner: owner.handle(),
            started: Instant::now(),
            continue_counter: AtomicU8::new(0),
            state: Mutex::new(TaskState {
                status: Status::Error,
                data: Bytes::new(),
                data_was_built: false,
                verify_mismatch: false,
                deferred_build: None,
                deriver,
            }),
        });
        Self { shared, owner }
    }

    pub fn key(&self) -> &LegacyCacheKey {
        &self.shared.key
    }

    /// Start the fetch and build. Call [`wait`](Self::wait) before reading
    /// the result.
    pub fn start(&self) {
        self.shared.context.backend().add_to_async_completion_counter(1);
        begin_get(&self.shared, &self.owner);
    }

    /// True once no asynchronous work is outstanding
    ///
    /// A build deferred to the waiting thread still runs in `wait`.
    pub fn poll(&self) -> bool {
        self.owner.poll()
    }

    /// Block until the task is complete, running a deferred build here
    pub fn wait(&self) {
        self.owner.wait();
        let deferred = {
            let mut state = self.shared.state.lock();
            state
                .deferred_build
                .take()
                .map(|mode| (mode, self.owner.barrier()))
        };
        if let Some((mode, barrier)) = deferred {
            tracing::debug!(key = %self.shared.key, "running deferred build on waiting thread");
            execute_build(&self.shared, mode);
            drop(barrier);
        }
        self.owner.wait();
    }

    /// Start and wait on the calling thread
    pub fn execute_sync(&self) {
        self.start();
        self.wait();
    }

    /// Flag the task as canceled; a build that has not started yet is skipped
    pub fn request_cancel(&self) {
        self.owner.request_cancel();
    }

    pub fn status(&self) -> Status {
        self.shared.state.lock().status
    }

    /// Move the result out of a finished task
    pub fn take_result(&self) -> LegacyGetResult {
        let mut state = self.shared.state.lock();
        LegacyGetResult {
            status: state.status,
            data: std::mem::take(&mut state.data).to_vec(),
            data_was_built: state.data_was_built,
            verify_mismatch: state.verify_mismatch,
        }
    }
}

impl Drop for LegacyFetchOrBuildTask {
    fn drop(&mut self) {
        self.wait();
    }
}

impl std::fmt::Debug for LegacyFetchOrBuildTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyFetchOrBuildTask")
            .field("name", &self.shared.name)
            .field("key", &self.shared.key.short_key())
            .field("owner", &self.owner)
            .finish()
    }
}

fn begin_get(shared: &Arc<TaskShared>, owner: &RequestOwner) {
    let _span = tracing::debug_span!("ddc_get", key = %shared.key).entered();
    shared.continue_counter.store(2, Ordering::Relaxed);
    {
        let _barrier = owner.barrier();
        let request = LegacyGetRequest::new(shared.name.clone(), shared.key.clone());
        let task = shared.clone();
        let on_complete: OnComplete<LegacyGetResponse> = Arc::new(move |response| {
            task.receive(response);
            if task.continue_counter.fetch_sub(1, Ordering::AcqRel) == 1 {
                end_get(&task, BuildThread::Unknown);
            }
        });
        shared
            .context
            .backend()
            .root()
            .legacy_get(slice::from_ref(&request), owner, on_complete);
    }

    // Blocking callers continue here even if the store switched threads
    if owner.priority() == Priority::Blocking {
        owner.wait();
    }

    if shared.continue_counter.fetch_sub(1, Ordering::AcqRel) == 1 {
        let _barrier = owner.barrier();
        end_get(shared, BuildThread::Caller);
    }
}

impl TaskShared {
    fn receive(&self, response: LegacyGetResponse) {
        let mut state = self.state.lock();
        state.status = response.status;
        if !response.status.is_ok() {
            return;
        }
        match response.value.as_ref().and_then(CacheValue::data) {
            Some(data) => state.data = data.clone(),
            None => {
                tracing::warn!(key = %self.key, store = response.name(), "hit returned no data");
                state.status = Status::Error;
            }
        }
    }
}

fn end_get(shared: &Arc<TaskShared>, thread: BuildThread) {
    let mode = {
        let mut state = shared.state.lock();
        let has_deriver = state.deriver.is_some();
        let deterministic = state
            .deriver
            .as_ref()
            .is_some_and(|deriver| deriver.is_deterministic());
        match state.status {
            Status::Ok if shared.context.verify() && deterministic => Some(BuildMode::Verify),
            Status::Error if has_deriver => {
                state.data_was_built = true;
                Some(BuildMode::Normal)
            }
            _ => None,
        }
    };
    match mode {
        Some(mode) => begin_build(shared, mode, thread),
        None => end_task(shared),
    }
}

fn begin_build(shared: &Arc<TaskShared>, mode: BuildMode, thread: BuildThread) {
    let threadsafe = shared
        .state
        .lock()
        .deriver
        .as_ref()
        .is_some_and(|deriver| deriver.is_build_threadsafe());
    if threadsafe {
        let task = shared.clone();
        shared
            .owner
            .launch_task("ddc_build", move || execute_build(&task, mode));
    } else if thread == BuildThread::Caller {
        execute_build(shared, mode);
    } else {
        tracing::debug!(key = %shared.key, "deferring build to the waiting thread");
        shared.state.lock().deferred_build = Some(mode);
    }
}

fn execute_build(shared: &Arc<TaskShared>, mode: BuildMode) {
    if shared.owner.is_canceled() {
        shared.state.lock().status = Status::Canceled;
        end_task(shared);
        return;
    }

    let deriver = shared.state.lock().deriver.take();
    let Some(mut deriver) = deriver else {
        end_task(shared);
        return;
    };

    let verify = mode == BuildMode::Verify;
    let built = {
        let _span = tracing::debug_span!(
            "ddc_build",
            key = %shared.key,
            plugin = deriver.plugin_name(),
            verify
        )
        .entered();
        panic::catch_unwind(AssertUnwindSafe(|| deriver.build())).unwrap_or_else(|_| {
            Err(anyhow::anyhow!("deriver panicked while building"))
        })
    };

    end_build(shared, mode, deriver.as_ref(), built);
}

fn end_build(
    shared: &Arc<TaskShared>,
    mode: BuildMode,
    deriver: &dyn DataDeriver,
    built: anyhow::Result<Vec<u8>>,
) {
    let mut put = None;
    let mut mismatch = None;
    {
        let mut state = shared.state.lock();
        match (mode, built) {
            (BuildMode::Verify, Ok(rebuilt)) => {
                if let Some(offset) = first_difference(&state.data, &rebuilt) {
                    tracing::error!(
                        plugin = deriver.plugin_name(),
                        asset = %deriver.debug_context(),
                        key = %shared.key,
                        bytes_in_cache = state.data.len(),
                        bytes_generated = rebuilt.len(),
                        offset,
                        "mismatch between cached data and generated data"
                    );
                    state.verify_mismatch = true;
                    mismatch = Some(VerifyMismatch {
                        key: shared.key.full_key().to_string(),
                        plugin: deriver.plugin_name().to_string(),
                        asset: deriver.debug_context(),
                        bytes_in_cache: state.data.len(),
                        bytes_generated: rebuilt.len(),
                        offset,
                    });
                }
            }
            (BuildMode::Verify, Err(error)) => {
                tracing::warn!(key = %shared.key, %error, "verify build failed, keeping fetched data");
            }
            (BuildMode::Normal, Ok(data)) => {
                let data = Bytes::from(data);
                state.status = Status::Ok;
                state.data = data.clone();
                put = Some(data);
            }
            (BuildMode::Normal, Err(error)) => {
                tracing::warn!(
                    plugin = deriver.plugin_name(),
                    key = %shared.key,
                    %error,
                    "build failed"
                );
                state.status = Status::Error;
            }
        }
    }

    if let Some(mismatch) = mismatch {
        shared.context.report_verify_mismatch(&mismatch);
    }
    if let Some(data) = put {
        begin_async_put(shared, data);
    }
    end_task(shared);
}

/// Index of the first differing byte, or the shorter length if one is a prefix
fn first_difference(cached: &[u8], rebuilt: &[u8]) -> Option<usize> {
    cached
        .iter()
        .zip(rebuilt)
        .position(|(a, b)| a != b)
        .or_else(|| (cached.len() != rebuilt.len()).then(|| cached.len().min(rebuilt.len())))
}

/// Decrements the async counter once the write-back callback is released
struct PendingPut {
    context: Arc<CacheContext>,
    key: LegacyCacheKey,
}

impl PendingPut {
    fn finish(&self, response: &LegacyPutResponse) {
        if !response.status.is_ok() {
            tracing::debug!(key = %self.key, status = %response.status, "write-back not stored");
        }
    }
}

impl Drop for PendingPut {
    fn drop(&mut self) {
        self.context.backend().add_to_async_completion_counter(-1);
    }
}

fn begin_async_put(shared: &Arc<TaskShared>, data: Bytes) {
    let _span = tracing::debug_span!("ddc_put", key = %shared.key).entered();
    dispatch_put(&shared.context, shared.name.clone(), shared.key.clone(), data);
}

/// Fire-and-forget legacy put on a detached owner
///
/// The put counts as an outstanding async request until the store releases
/// its completion callback.
pub(crate) fn dispatch_put(context: &Arc<CacheContext>, name: String, key: LegacyCacheKey, data: Bytes) {
    let backend = context.backend();
    backend.add_to_async_completion_counter(1);

    let request = LegacyPutRequest::new(name, key.clone(), CacheValue::new(data));
    let pending = PendingPut {
        context: context.clone(),
        key,
    };
    let on_complete: OnComplete<LegacyPutResponse> =
        Arc::new(move |response| pending.finish(&response));

    let owner = context.new_owner(Priority::Normal);
    backend
        .root()
        .legacy_put(slice::from_ref(&request), &owner, on_complete);
    owner.keep_alive();
}

fn end_task(shared: &Arc<TaskShared>) {
    let (status, built, size) = {
        let mut state = shared.state.lock();
        if !state.status.is_ok() {
            state.data = Bytes::new();
        }
        state.deriver = None;
        (state.status, state.data_was_built, state.data.len())
    };
    if status.is_ok() {
        shared
            .context
            .resource_stats()
            .record(&shared.asset_type, built, shared.started.elapsed(), size);
    }
    tracing::trace!(key = %shared.key, %status, built, "fetch-or-build finished");
    shared.context.backend().add_to_async_completion_counter(-1);
}
