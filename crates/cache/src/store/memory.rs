//! In-memory cache store
//!
//! Records, values and legacy blobs live in `DashMap`s. The store honors the
//! query and store bits of each request's policy for its location, strips
//! payloads for `SKIP_DATA` requests and answers `Canceled` once its owner
//! is canceled. Every batch runs as a single task on the owner.

use super::{CacheStore, OnComplete, StoreRequest};
use crate::metrics::{CacheType, StoreCounters, UsageStatsNode};
use crate::owner::RequestOwner;
use dashmap::DashMap;
use ddc_core::{
    CacheKey, CachePolicy, CacheRecord, CacheValue, GetChunkRequest, GetChunkResponse, GetRequest,
    GetResponse, GetValueRequest, GetValueResponse, LegacyCacheKey, LegacyDeleteRequest,
    LegacyDeleteResponse, LegacyGetRequest, LegacyGetResponse, LegacyPutRequest,
    LegacyPutResponse, PutRequest, PutResponse, PutValueRequest, PutValueResponse, Status,
    ValueId,
};
use std::sync::Arc;
use std::time::Instant;

/// Where a store sits relative to the machine running the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    Local,
    Remote,
}

impl StoreLocation {
    pub fn is_local(self) -> bool {
        self == StoreLocation::Local
    }
}

struct MemoryInner {
    name: String,
    local: bool,
    transient: bool,
    records: DashMap<CacheKey, CacheRecord>,
    values: DashMap<CacheKey, CacheValue>,
    legacy: DashMap<CacheKey, CacheValue>,
    counters: StoreCounters,
}

pub struct MemoryCacheStore {
    inner: Arc<MemoryInner>,
    cache_type: CacheType,
}

impl MemoryCacheStore {
    pub fn new(name: impl Into<String>, location: StoreLocation) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                name: name.into(),
                local: location.is_local(),
                transient: false,
                records: DashMap::new(),
                values: DashMap::new(),
                legacy: DashMap::new(),
                counters: StoreCounters::new(),
            }),
            cache_type: CacheType::Memory,
        }
    }

    /// Report statistics under a different store kind
    pub fn with_cache_type(mut self, cache_type: CacheType) -> Self {
        self.cache_type = cache_type;
        self
    }

    /// Whether transient deletes apply to this store
    pub fn with_transient(mut self, transient: bool) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.transient = transient;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_local(&self) -> bool {
        self.inner.local
    }

    pub fn contains_legacy(&self, key: &LegacyCacheKey) -> bool {
        self.inner.legacy.contains_key(key.key())
    }

    pub fn legacy_len(&self) -> usize {
        self.inner.legacy.len()
    }

    pub fn record_count(&self) -> usize {
        self.inner.records.len()
    }

    pub fn value_count(&self) -> usize {
        self.inner.values.len()
    }

    fn run_batch<R: StoreRequest>(
        &self,
        name: &'static str,
        requests: &[R],
        owner: &RequestOwner,
        on_complete: OnComplete<R::Response>,
        handler: fn(&MemoryInner, &R) -> R::Response,
    ) {
        if requests.is_empty() {
            return;
        }
        let requests = requests.to_vec();
        let inner = self.inner.clone();
        let handle = owner.handle();
        owner.launch_task(name, move || {
            for request in &requests {
                let response = if handle.is_canceled() {
                    request.respond(Status::Canceled)
                } else {
                    handler(&inner, request)
                };
                on_complete(response);
            }
        });
    }
}

impl MemoryInner {
    fn can_query(&self, policy: CachePolicy) -> bool {
        policy.allows_query(self.local)
    }

    fn can_store(&self, policy: CachePolicy) -> bool {
        policy.allows_store(self.local)
    }

    fn put(&self, request: &PutRequest) -> PutResponse {
        let started = Instant::now();
        if !self.can_store(request.policy) || !request.record.is_complete() {
            self.counters.record_put_miss();
            return request.make_response(Status::Error);
        }
        self.counters
            .record_put_hit(request.record.raw_size(), started.elapsed());
        self.records
            .insert(request.record.key.clone(), request.record.clone());
        tracing::trace!(store = %self.name, key = %request.record.key, "put record");
        request.make_response(Status::Ok)
    }

    fn get(&self, request: &GetRequest) -> GetResponse {
        let started = Instant::now();
        if !self.can_query(request.policy) {
            return request.make_response(Status::Error);
        }
        let Some(record) = self.records.get(&request.key).map(|r| r.value().clone()) else {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        };
        let mut response = request.make_response(Status::Ok);
        response.record = if request.policy.contains(CachePolicy::SKIP_DATA) {
            self.counters.record_get_hit(0, started.elapsed());
            record.remove_data()
        } else {
            self.counters
                .record_get_hit(record.raw_size(), started.elapsed());
            record
        };
        response
    }

    fn put_value(&self, request: &PutValueRequest) -> PutValueResponse {
        let started = Instant::now();
        if !self.can_store(request.policy) || !request.value.has_data() {
            self.counters.record_put_miss();
            return request.make_response(Status::Error);
        }
        self.counters
            .record_put_hit(request.value.raw_size(), started.elapsed());
        self.values
            .insert(request.key.clone(), request.value.clone());
        request.make_response(Status::Ok)
    }

    fn get_value(&self, request: &GetValueRequest) -> GetValueResponse {
        let started = Instant::now();
        if !self.can_query(request.policy) {
            return request.make_response(Status::Error);
        }
        let Some(value) = self.values.get(&request.key).map(|v| v.value().clone()) else {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        };
        let mut response = request.make_response(Status::Ok);
        response.value = Some(self.strip(value, request.policy, started));
        response
    }

    fn get_chunk(&self, request: &GetChunkRequest) -> GetChunkResponse {
        let started = Instant::now();
        if !self.can_query(request.policy) {
            return request.make_response(Status::Error);
        }
        let value = if request.id == ValueId::NULL {
            self.values.get(&request.key).map(|v| v.value().clone())
        } else {
            self.records
                .get(&request.key)
                .and_then(|entry| entry.value().value(&request.id).cloned())
        };
        let Some(value) = value else {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        };
        if !request.raw_hash.is_zero() && request.raw_hash != value.raw_hash() {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        }
        let Some(chunk) = value.chunk(request.raw_offset, request.raw_size) else {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        };

        let mut response = request.make_response(Status::Ok);
        response.raw_hash = value.raw_hash();
        response.raw_size = chunk.len() as u64;
        if request.policy.contains(CachePolicy::SKIP_DATA) {
            self.counters.record_get_hit(0, started.elapsed());
        } else {
            self.counters
                .record_get_hit(chunk.len() as u64, started.elapsed());
            response.raw_data = Some(chunk);
        }
        response
    }

    fn legacy_put(&self, request: &LegacyPutRequest) -> LegacyPutResponse {
        let started = Instant::now();
        if !self.can_store(request.policy) || !request.value.has_data() {
            self.counters.record_put_miss();
            return request.make_response(Status::Error);
        }
        self.counters
            .record_put_hit(request.value.raw_size(), started.elapsed());
        self.legacy
            .insert(request.key.key().clone(), request.value.clone());
        tracing::trace!(store = %self.name, key = %request.key, "put legacy entry");
        request.make_response(Status::Ok)
    }

    fn legacy_get(&self, request: &LegacyGetRequest) -> LegacyGetResponse {
        let started = Instant::now();
        if !self.can_query(request.policy) {
            return request.make_response(Status::Error);
        }
        let Some(value) = self.legacy.get(request.key.key()).map(|v| v.value().clone()) else {
            self.counters.record_get_miss(started.elapsed());
            return request.make_response(Status::Error);
        };
        let mut response = request.make_response(Status::Ok);
        response.value = Some(self.strip(value, request.policy, started));
        response
    }

    fn legacy_delete(&self, request: &LegacyDeleteRequest) -> LegacyDeleteResponse {
        if !self.can_store(request.policy) || (request.transient && !self.transient) {
            return request.make_response(Status::Error);
        }
        match self.legacy.remove(request.key.key()) {
            Some(_) => {
                tracing::trace!(store = %self.name, key = %request.key, "deleted legacy entry");
                request.make_response(Status::Ok)
            }
            None => request.make_response(Status::Error),
        }
    }

    /// Apply `SKIP_DATA` and count the hit
    fn strip(&self, value: CacheValue, policy: CachePolicy, started: Instant) -> CacheValue {
        if policy.contains(CachePolicy::SKIP_DATA) {
            self.counters.record_get_hit(0, started.elapsed());
            value.remove_data()
        } else {
            self.counters
                .record_get_hit(value.raw_size(), started.elapsed());
            value
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn put(&self, requests: &[PutRequest], owner: &RequestOwner, on_complete: OnComplete<PutResponse>) {
        self.run_batch("memory_put", requests, owner, on_complete, MemoryInner::put);
    }

    fn get(&self, requests: &[GetRequest], owner: &RequestOwner, on_complete: OnComplete<GetResponse>) {
        self.run_batch("memory_get", requests, owner, on_complete, MemoryInner::get);
    }

    fn put_value(
        &self,
        requests: &[PutValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<PutValueResponse>,
    ) {
        self.run_batch("memory_put_value", requests, owner, on_complete, MemoryInner::put_value);
    }

    fn get_value(
        &self,
        requests: &[GetValueRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetValueResponse>,
    ) {
        self.run_batch("memory_get_value", requests, owner, on_complete, MemoryInner::get_value);
    }

    fn get_chunks(
        &self,
        requests: &[GetChunkRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<GetChunkResponse>,
    ) {
        self.run_batch("memory_get_chunks", requests, owner, on_complete, MemoryInner::get_chunk);
    }

    fn legacy_put(
        &self,
        requests: &[LegacyPutRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyPutResponse>,
    ) {
        self.run_batch("memory_legacy_put", requests, owner, on_complete, MemoryInner::legacy_put);
    }

    fn legacy_get(
        &self,
        requests: &[LegacyGetRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyGetResponse>,
    ) {
        self.run_batch("memory_legacy_get", requests, owner, on_complete, MemoryInner::legacy_get);
    }

    fn legacy_delete(
        &self,
        requests: &[LegacyDeleteRequest],
        owner: &RequestOwner,
        on_complete: OnComplete<LegacyDeleteResponse>,
    ) {
        self.run_batch(
            "memory_legacy_delete",
            requests,
            owner,
            on_complete,
            MemoryInner::legacy_delete,
        );
    }

    fn usage_stats(&self) -> UsageStatsNode {
        self.inner
            .counters
            .to_node(self.cache_type, &self.inner.name, self.inner.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::{OwnerHandle, Priority};
    use crate::pool::WorkerPool;
    use crate::store::call_blocking;
    use ddc_core::{CacheBucket, DEFAULT_MAX_KEY_LENGTH};

    fn key(name: &str) -> CacheKey {
        CacheKey::for_data(CacheBucket::new("Test").unwrap(), name.as_bytes())
    }

    fn legacy_key(name: &str) -> LegacyCacheKey {
        LegacyCacheKey::new(name, DEFAULT_MAX_KEY_LENGTH).unwrap()
    }

    struct Fixture {
        _pool: WorkerPool,
        owner: RequestOwner,
    }

    impl Fixture {
        fn new() -> Self {
            let pool = WorkerPool::new(2).unwrap();
            let owner = RequestOwner::new(pool.handle(), Priority::Normal);
            Self { _pool: pool, owner }
        }

        fn handle(&self) -> OwnerHandle {
            self.owner.handle()
        }
    }

    #[test]
    fn test_record_round_trip_and_skip_data() {
        let fixture = Fixture::new();
        let store = MemoryCacheStore::new("mem", StoreLocation::Local);
        let id = ValueId::from_name("payload");
        let record = CacheRecord::new(key("a")).with_value(id, CacheValue::new(b"abc".to_vec()));

        let put = call_blocking(&fixture.handle(), |owner, done| {
            store.put(&[PutRequest::new("a", record.clone()).with_user_data(5)], owner, done)
        });
        assert_eq!(put[0].status, Status::Ok);
        assert_eq!(put[0].user_data(), 5);

        let got = call_blocking(&fixture.handle(), |owner, done| {
            store.get(&[GetRequest::new("a", key("a"))], owner, done)
        });
        assert_eq!(got[0].status, Status::Ok);
        assert_eq!(got[0].record, record);

        let skipped = call_blocking(&fixture.handle(), |owner, done| {
            let request = GetRequest::new("a", key("a"))
                .with_policy(CachePolicy::QUERY | CachePolicy::SKIP_DATA);
            store.get(&[request], owner, done)
        });
        assert_eq!(skipped[0].status, Status::Ok);
        assert!(!skipped[0].record.is_complete());
        assert_eq!(skipped[0].record.raw_size(), 3);
    }

    #[test]
    fn test_remote_store_honors_locality() {
        let fixture = Fixture::new();
        let store = MemoryCacheStore::new("remote", StoreLocation::Remote);
        let request = PutValueRequest::new("v", key("v"), CacheValue::new(b"v".to_vec()))
            .with_policy(CachePolicy::QUERY | CachePolicy::STORE_LOCAL);
        let put = call_blocking(&fixture.handle(), |owner, done| {
            store.put_value(&[request], owner, done)
        });
        assert_eq!(put[0].status, Status::Error);
        assert_eq!(store.value_count(), 0);
    }

    #[test]
    fn test_chunks_from_values_and_records() {
        let fixture = Fixture::new();
        let store = MemoryCacheStore::new("mem", StoreLocation::Local);
        let value = CacheValue::new(b"0123456789".to_vec());
        let id = ValueId::from_name("mip");
        let record = CacheRecord::new(key("r")).with_value(id, value.clone());

        call_blocking(&fixture.handle(), |owner, done| {
            store.put_value(&[PutValueRequest::new("v", key("v"), value.clone())], owner, done)
        });
        call_blocking(&fixture.handle(), |owner, done| {
            store.put(&[PutRequest::new("r", record)], owner, done)
        });

        let mut from_value = GetChunkRequest::new("v", key("v")).with_user_data(1);
        from_value.raw_offset = 4;
        from_value.raw_size = 3;
        let mut from_record = GetChunkRequest::new("r", key("r")).with_user_data(2);
        from_record.id = id;
        from_record.raw_offset = 8;
        let mut bad_hash = GetChunkRequest::new("v", key("v")).with_user_data(3);
        bad_hash.raw_hash = ddc_core::CacheHash::of(b"other");

        let mut chunks = call_blocking(&fixture.handle(), |owner, done| {
            store.get_chunks(&[from_value, from_record, bad_hash], owner, done)
        });
        chunks.sort_by_key(|c| c.user_data());
        assert_eq!(chunks[0].raw_data.as_deref(), Some(&b"456"[..]));
        assert_eq!(chunks[1].raw_data.as_deref(), Some(&b"89"[..]));
        assert_eq!(chunks[1].raw_size, 2);
        assert_eq!(chunks[2].status, Status::Error);
    }

    #[test]
    fn test_transient_delete_only_hits_transient_stores() {
        let fixture = Fixture::new();
        let durable = MemoryCacheStore::new("durable", StoreLocation::Local);
        let transient = MemoryCacheStore::new("boot", StoreLocation::Local).with_transient(true);
        let key = legacy_key("K");
        for store in [&durable, &transient] {
            call_blocking(&fixture.handle(), |owner, done| {
                store.legacy_put(
                    &[LegacyPutRequest::new("k", key.clone(), CacheValue::new(b"k".to_vec()))],
                    owner,
                    done,
                )
            });
        }

        let mut delete = LegacyDeleteRequest::new("k", key.clone());
        delete.transient = true;
        for store in [&durable, &transient] {
            call_blocking(&fixture.handle(), |owner, done| {
                store.legacy_delete(&[delete.clone()], owner, done)
            });
        }
        assert!(durable.contains_legacy(&key));
        assert!(!transient.contains_legacy(&key));
    }

    #[test]
    fn test_canceled_owner_gets_canceled_responses() {
        let fixture = Fixture::new();
        let store = MemoryCacheStore::new("mem", StoreLocation::Local);
        fixture.owner.request_cancel();
        let got = call_blocking(&fixture.handle(), |owner, done| {
            store.legacy_get(&[LegacyGetRequest::new("k", legacy_key("K"))], owner, done)
        });
        assert_eq!(got[0].status, Status::Canceled);
    }

    #[test]
    fn test_usage_counts_hits_and_misses() {
        let fixture = Fixture::new();
        let store = MemoryCacheStore::new("mem", StoreLocation::Local);
        let key = legacy_key("K");
        call_blocking(&fixture.handle(), |owner, done| {
            store.legacy_put(
                &[LegacyPutRequest::new("k", key.clone(), CacheValue::new(vec![1, 2, 3]))],
                owner,
                done,
            )
        });
        call_blocking(&fixture.handle(), |owner, done| {
            store.legacy_get(
                &[
                    LegacyGetRequest::new("hit", key.clone()),
                    LegacyGetRequest::new("miss", legacy_key("other")),
                ],
                owner,
                done,
            )
        });

        let node = store.usage_stats();
        assert_eq!(node.usage.get.hits, 1);
        assert_eq!(node.usage.get.misses, 1);
        assert_eq!(node.usage.put.hits, 1);
        assert_eq!(node.usage.get.bytes, 3);
        assert!(node.is_local);
    }
}
