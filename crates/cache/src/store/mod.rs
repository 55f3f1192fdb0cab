//! The backend contract and the stores shipped with the engine
//!
//! A [`CacheStore`] accepts batches of requests together with the
//! [`RequestOwner`] they belong to and a completion callback. The store
//! must invoke the callback exactly once per request, with a response built
//! by that request's `make_response`, and must do its work through the
//! owner (`launch_task` or a barrier) so that waiting on the owner waits for
//! the batch.

pub mod hierarchical;
pub mod memory;

pub use hierarchical::HierarchicalCacheStore;
pub use memory::{MemoryCacheStore, StoreLocation};

use crate::maintainer::MaintainerRegistry;
use crate::metrics::UsageStatsNode;
use crate::owner::{OwnerHandle, Priority, RequestOwner};
use crossbeam::channel::{self, Receiver};
use ddc_core::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest,
    GetValueResponse, LegacyDeleteRequest, LegacyDeleteResponse, LegacyGetRequest,
    LegacyGetResponse, LegacyPutRequest, LegacyPutResponse, PutRequest, PutResponse,
    PutValueRequest, PutValueResponse, Status,
};
use std::sync::Arc;

/// Completion callback, invoked once per request from any thread
pub type OnComplete<R> = Arc<dyn Fn(R) + Send + Sync>;

/// A callback that ignores every response
pub fn noop_completion<R: 'static>() -> OnComplete<R> {
    Arc::new(|_| {})
}

/// A callback that forwards every response into a channel
///
/// The receiver yields exactly one response per request once the owning
/// [`RequestOwner`] has been waited on.
pub fn completion_channel<R: Send + 'static>() -> (OnComplete<R>, Receiver<R>) {
    let (sender, receiver) = channel::unbounded();
    let on_complete: OnComplete<R> = Arc::new(move |response| {
        let _ = sender.send(response);
    });
    (on_complete, receiver)
}

/// Run one batch to completion on the calling thread
///
/// `issue` is called with a blocking child of `owner` and a channel
/// callback; the collected responses are returned in completion order.
pub fn call_blocking<R: Send + 'static>(
    owner: &OwnerHandle,
    issue: impl FnOnce(&RequestOwner, OnComplete<R>),
) -> Vec<R> {
    let child = owner.new_child(Priority::Blocking);
    let (on_complete, receiver) = completion_channel();
    issue(&child, on_complete);
    child.wait();
    receiver.try_iter().collect()
}

/// A request that knows how to build its own response
pub trait StoreRequest: Clone + Send + 'static {
    type Response: StoreResponse;

    fn respond(&self, status: Status) -> Self::Response;
}

macro_rules! store_requests {
    ($($request:ty => $response:ty),* $(,)?) => {
        $(
            impl StoreRequest for $request {
                type Response = $response;

                fn respond(&self, status: Status) -> $response {
                    self.make_response(status)
                }
            }
        )*
    };
}

store_requests!(
    PutRequest => PutResponse,
    GetRequest => GetResponse,
    PutValueRequest => PutValueResponse,
    GetValueRequest => GetValueResponse,
    GetChunkRequest => GetChunkResponse,
    LegacyPutRequest => LegacyPutResponse,
    LegacyGetRequest => LegacyGetResponse,
    LegacyDeleteRequest => LegacyDeleteResponse,
);

/// Fields every response exposes to generic store code
pub trait StoreResponse: Send + 'static {
    fn status(&self) -> Status;

    /// Payload bytes carried by the response
    fn payload_size(&self) -> u64 {
        0
    }
}

macro_rules! store_responses {
    ($($response:ty),* $(,)?) => {
        $(
            impl StoreResponse for $response {
                fn status(&self) -> Status {
                    self.status
                }
            }
        )*
    };
}

store_responses!(
    PutResponse,
    PutValueResponse,
    LegacyPutResponse,
    LegacyDeleteResponse,
);

impl StoreResponse for GetResponse {
    fn status(&self) -> Status {
        self.status
    }

    fn payload_size(&self) -> u64 {
        self.record.raw_size()
    }
}

impl StoreResponse for GetValueResponse {
    fn status(&self) -> Status {
        self.status
    }

    fn payload_size(&self) -> u64 {
        self.value.as_ref().map_or(0, |v| v.raw_size())
    }
}

impl StoreResponse for GetChunkResponse {
    fn status(&self) -> Status {
        self.status
    }

    fn payload_size(&self) -> u64 {
        self.raw_size
    }
}

impl StoreResponse for LegacyGetResponse {
    fn status(&self) -> Status {
        self.status
    }

    fn payload_size(&self) -> u64 {
        self.value.as_ref().map_or(0, |v| v.raw_size())
    }
}

/// A cache store in the backend graph
pub trait CacheStore: Send + Sync {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner, on_complete: OnComplete<PutResponse>);

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner, on_complete: OnComplete<GetResponse>);

    fn put_value(
        &self,
        requests: &[PutValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<PutValueResponse>,
    );

    fn get_value(
        &self,
        requests: &[GetValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetValueResponse>,
    );

    fn get_chunks(
        &self,
        requests: &[GetChunkRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetChunkResponse>,
    );

    fn legacy_put(
        &self,
        requests: &[LegacyPutRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyPutResponse>,
    );

    fn legacy_get(
        &self,
        requests: &[LegacyGetRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyGetResponse>,
    );

    fn legacy_delete(
        &self,
        requests: &[LegacyDeleteRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyDeleteResponse>,
    );

    /// Statistics for this store and any stores beneath it
    fn usage_stats(&self) -> UsageStatsNode;

    /// Register background maintainers for this store and its children
    fn register_maintainers(&self, _registry: &MaintainerRegistry) {}
}
