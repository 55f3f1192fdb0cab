//! Ordered chain of cache stores
//!
//! Gets query the children in order and stop at the first hit. A hit from a
//! later child is written back to the earlier children when the request's
//! policy allows storing and the payload is complete. Puts and deletes go to
//! every child and succeed if any child succeeded.

use super::{call_blocking, CacheStore, OnComplete, StoreRequest, StoreResponse};
use crate::maintainer::MaintainerRegistry;
use crate::metrics::{CacheType, StoreCounters, UsageStatsNode};
use crate::owner::{OwnerHandle, RequestOwner};
use ddc_core::{
    CachePolicy, CacheValue, GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest,
    GetValueResponse, LegacyDeleteRequest, LegacyDeleteResponse, LegacyGetRequest,
    LegacyGetResponse, LegacyPutRequest, LegacyPutResponse, PutRequest, PutResponse,
    PutValueRequest, PutValueResponse, Status,
};
use std::slice;
use std::sync::Arc;
use std::time::Instant;

struct Chain {
    name: String,
    children: Vec<Arc<dyn CacheStore>>,
    counters: StoreCounters,
}

pub struct HierarchicalCacheStore {
    chain: Arc<Chain>,
}

impl HierarchicalCacheStore {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn CacheStore>>) -> Self {
        Self {
            chain: Arc::new(Chain {
                name: name.into(),
                children,
                counters: StoreCounters::new(),
            }),
        }
    }

    pub fn children(&self) -> &[Arc<dyn CacheStore>] {
        &self.chain.children
    }

    fn run_batch<R: StoreRequest>(
        &self,
        name: &'static str,
        requests: &[R],
        owner: &RequestOwner,
        on_complete: OnComplete<R::Response>,
        handler: impl Fn(&Chain, &OwnerHandle, &R) -> R::Response + Send + 'static,
    ) {
        if requests.is_empty() {
            return;
        }
        let requests = requests.to_vec();
        let chain = self.chain.clone();
        let handle = owner.handle();
        owner.launch_task(name, move || {
            for request in &requests {
                let response = if handle.is_canceled() {
                    request.respond(Status::Canceled)
                } else {
                    handler(&chain, &handle, request)
                };
                on_complete(response);
            }
        });
    }
}

type Issue<R> = fn(&dyn CacheStore, &[R], &RequestOwner, OnComplete<<R as StoreRequest>::Response>);

impl Chain {
    /// Query children in order; returns the index of the child that hit
    fn first_hit<R: StoreRequest>(
        &self,
        handle: &OwnerHandle,
        request: &R,
        issue: Issue<R>,
    ) -> (Option<usize>, R::Response) {
        let started = Instant::now();
        for (index, child) in self.children.iter().enumerate() {
            let response = call_blocking(handle, |owner, done| {
                issue(child.as_ref(), slice::from_ref(request), owner, done)
            })
            .pop();
            match response {
                Some(response) if response.status() == Status::Ok => {
                    self.counters
                        .record_get_hit(response.payload_size(), started.elapsed());
                    return (Some(index), response);
                }
                Some(response) if response.status() == Status::Canceled => {
                    return (None, response);
                }
                _ => {}
            }
        }
        self.counters.record_get_miss(started.elapsed());
        (None, request.respond(Status::Error))
    }

    /// Send to every child; `Ok` if any child stored it
    fn store_all<R: StoreRequest>(
        &self,
        handle: &OwnerHandle,
        request: &R,
        issue: Issue<R>,
        payload_size: u64,
    ) -> R::Response {
        let started = Instant::now();
        let mut stored = false;
        for child in &self.children {
            let responses = call_blocking(handle, |owner, done| {
                issue(child.as_ref(), slice::from_ref(request), owner, done)
            });
            stored |= responses.iter().any(|r| r.status() == Status::Ok);
        }
        if handle.is_canceled() && !stored {
            return request.respond(Status::Canceled);
        }
        if stored {
            self.counters.record_put_hit(payload_size, started.elapsed());
            request.respond(Status::Ok)
        } else {
            self.counters.record_put_miss();
            request.respond(Status::Error)
        }
    }

    /// Write a hit back to the children in front of the one that served it
    fn backfill<R: StoreRequest>(&self, handle: &OwnerHandle, hit: usize, request: R, issue: Issue<R>) {
        for child in &self.children[..hit] {
            call_blocking(handle, |owner, done| {
                issue(child.as_ref(), slice::from_ref(&request), owner, done)
            });
        }
    }

    fn get(&self, handle: &OwnerHandle, request: &GetRequest) -> GetResponse {
        let (hit, response) = self.first_hit(handle, request, |s, r, o, d| s.get(r, o, d));
        if let Some(hit @ 1..) = hit {
            if request.policy.intersects(CachePolicy::STORE) && response.record.is_complete() {
                let put = PutRequest::new(request.name.clone(), response.record.clone())
                    .with_policy(request.policy);
                self.backfill(handle, hit, put, |s, r, o, d| s.put(r, o, d));
            }
        }
        response
    }

    fn get_value(&self, handle: &OwnerHandle, request: &GetValueRequest) -> GetValueResponse {
        let (hit, response) = self.first_hit(handle, request, |s, r, o, d| s.get_value(r, o, d));
        if let (Some(hit @ 1..), Some(value)) = (hit, &response.value) {
            if request.policy.intersects(CachePolicy::STORE) && value.has_data() {
                let put = PutValueRequest::new(request.name.clone(), request.key.clone(), value.clone())
                    .with_policy(request.policy);
                self.backfill(handle, hit, put, |s, r, o, d| s.put_value(r, o, d));
            }
        }
        response
    }

    fn legacy_get(&self, handle: &OwnerHandle, request: &LegacyGetRequest) -> LegacyGetResponse {
        let (hit, response) = self.first_hit(handle, request, |s, r, o, d| s.legacy_get(r, o, d));
        if let (Some(hit @ 1..), Some(value)) = (hit, &response.value) {
            if request.policy.intersects(CachePolicy::STORE) {
                let value = if value.has_data() {
                    Some(value.clone())
                } else {
                    self.fetch_legacy_data(handle, hit, request)
                };
                if let Some(value) = value {
                    let put = LegacyPutRequest::new(request.name.clone(), request.key.clone(), value)
                        .with_policy(request.policy);
                    self.backfill(handle, hit, put, |s, r, o, d| s.legacy_put(r, o, d));
                }
            }
        }
        response
    }

    /// Prefetches skip data but still fill the faster stores
    fn fetch_legacy_data(
        &self,
        handle: &OwnerHandle,
        hit: usize,
        request: &LegacyGetRequest,
    ) -> Option<CacheValue> {
        let full = request
            .clone()
            .with_policy(request.policy.difference(CachePolicy::SKIP_DATA));
        let child = &self.children[hit];
        call_blocking(handle, |owner, done| {
            child.legacy_get(slice::from_ref(&full), owner, done)
        })
        .pop()
        .filter(|response| response.status == Status::Ok)
        .and_then(|response| response.value)
        .filter(CacheValue::has_data)
    }
}

impl CacheStore for HierarchicalCacheStore {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner, on_complete: OnComplete<PutResponse>) {
        self.run_batch("hierarchical_put", requests, owner, on_complete, |chain, handle, request| {
            chain.store_all(handle, request, |s, r, o, d| s.put(r, o, d), request.record.raw_size())
        });
    }

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner, on_complete: OnComplete<GetResponse>) {
        self.run_batch("hierarchical_get", requests, owner, on_complete, Chain::get);
    }

    fn put_value(
        &self,
        requests: &[PutValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<PutValueResponse>,
    ) {
        self.run_batch("hierarchical_put_value", requests, owner, on_complete, |chain, handle, request| {
            chain.store_all(handle, request, |s, r, o, d| s.put_value(r, o, d), request.value.raw_size())
        });
    }

    fn get_value(
        &self,
        requests: &[GetValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetValueResponse>,
    ) {
        self.run_batch("hierarchical_get_value", requests, owner, on_complete, Chain::get_value);
    }

    fn get_chunks(
        &self,
        requests: &[GetChunkRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetChunkResponse>,
    ) {
        self.run_batch("hierarchical_get_chunks", requests, owner, on_complete, |chain, handle, request| {
            chain.first_hit(handle, request, |s, r, o, d| s.get_chunks(r, o, d)).1
        });
    }

    fn legacy_put(
        &self,
        requests: &[LegacyPutRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyPutResponse>,
    ) {
        self.run_batch("hierarchical_legacy_put", requests, owner, on_complete, |chain, handle, request| {
            chain.store_all(handle, request, |s, r, o, d| s.legacy_put(r, o, d), request.value.raw_size())
        });
    }

    fn legacy_get(
        &self,
        requests: &[LegacyGetRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyGetResponse>,
    ) {
        self.run_batch("hierarchical_legacy_get", requests, owner, on_complete, Chain::legacy_get);
    }

    fn legacy_delete(
        &self,
        requests: &[LegacyDeleteRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyDeleteResponse>,
    ) {
        self.run_batch("hierarchical_legacy_delete", requests, owner, on_complete, |chain, handle, request| {
            chain.store_all(handle, request, |s, r, o, d| s.legacy_delete(r, o, d), 0)
        });
    }

    fn usage_stats(&self) -> UsageStatsNode {
        let mut node = self
            .chain
            .counters
            .to_node(CacheType::Hierarchical, &self.chain.name, true);
        node.children = self.chain.children.iter().map(|c| c.usage_stats()).collect();
        node
    }

    fn register_maintainers(&self, registry: &MaintainerRegistry) {
        for child in &self.chain.children {
            child.register_maintainers(registry);
        }
    }
}
