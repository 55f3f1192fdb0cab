//! Legacy string-keyed operations

use super::DerivedDataCache;
use crate::deriver::DataDeriver;
use crate::legacy::task::dispatch_put;
use crate::legacy::{LegacyFetchOrBuildTask, LegacyGetResult};
use crate::owner::Priority;
use crate::store::{call_blocking, OnComplete};
use bytes::Bytes;
use ddc_core::{
    CachePolicy, Error, LegacyCacheKey, LegacyDeleteRequest, LegacyGetRequest, LegacyGetResponse,
    Result, Status,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One existence bit per queried key, in query order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExistenceBits {
    words: Vec<u64>,
    len: usize,
}

impl ExistenceBits {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            return;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn all_set(&self) -> bool {
        self.count_set() == self.len
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|index| self.get(index))
    }
}

impl DerivedDataCache {
    fn legacy_key(&self, cache_key: &str) -> Result<LegacyCacheKey> {
        self.context.backend().legacy_key(cache_key)
    }

    fn new_task(
        &self,
        cache_key: &str,
        debug_context: &str,
        deriver: Option<Box<dyn DataDeriver>>,
        priority: Priority,
    ) -> Result<LegacyFetchOrBuildTask> {
        Ok(LegacyFetchOrBuildTask::new(
            self.context.clone(),
            debug_context,
            self.legacy_key(cache_key)?,
            deriver,
            priority,
        ))
    }

    /// Fetch the deriver's data, building and storing it on a miss
    pub fn get_synchronous(&self, deriver: Box<dyn DataDeriver>) -> Result<LegacyGetResult> {
        let cache_key = deriver.cache_key();
        let debug_context = deriver.debug_context();
        tracing::trace!(key = %cache_key, context = %debug_context, "get synchronous");
        let task = self.new_task(&cache_key, &debug_context, Some(deriver), Priority::Blocking)?;
        task.execute_sync();
        Ok(task.take_result())
    }

    /// Fetch data for a prebuilt key; a miss is `Status::Error`
    pub fn get_synchronous_by_key(&self, cache_key: &str, debug_context: &str) -> Result<LegacyGetResult> {
        tracing::trace!(key = %cache_key, context = %debug_context, "get synchronous");
        let task = self.new_task(cache_key, debug_context, None, Priority::Blocking)?;
        task.execute_sync();
        Ok(task.take_result())
    }

    /// Start a fetch-or-build and return its handle immediately
    pub fn get_asynchronous(&self, deriver: Box<dyn DataDeriver>) -> Result<u32> {
        let cache_key = deriver.cache_key();
        let debug_context = deriver.debug_context();
        self.start_asynchronous(&cache_key, &debug_context, Some(deriver))
    }

    pub fn get_asynchronous_by_key(&self, cache_key: &str, debug_context: &str) -> Result<u32> {
        self.start_asynchronous(cache_key, debug_context, None)
    }

    fn start_asynchronous(
        &self,
        cache_key: &str,
        debug_context: &str,
        deriver: Option<Box<dyn DataDeriver>>,
    ) -> Result<u32> {
        let task = Arc::new(self.new_task(cache_key, debug_context, deriver, Priority::Normal)?);
        let handle = self.pending_tasks.insert(task.clone());
        tracing::trace!(key = %cache_key, context = %debug_context, handle, "get asynchronous");
        task.start();
        Ok(handle)
    }

    fn pending_task(&self, handle: u32) -> Result<Arc<LegacyFetchOrBuildTask>> {
        self.pending_tasks
            .get(handle)
            .ok_or(Error::UnknownHandle { handle })
    }

    /// True once the request behind `handle` no longer needs the pool
    pub fn poll_asynchronous_completion(&self, handle: u32) -> Result<bool> {
        Ok(self.pending_task(handle)?.poll())
    }

    /// Block until the request behind `handle` is complete
    pub fn wait_asynchronous_completion(&self, handle: u32) -> Result<()> {
        self.pending_task(handle)?.wait();
        tracing::trace!(handle, "async request complete");
        Ok(())
    }

    /// Retrieve and release the result of an asynchronous request
    ///
    /// Waits if the request is still running. A handle can be retrieved
    /// once; later calls fail with `UnknownHandle`.
    pub fn get_asynchronous_results(&self, handle: u32) -> Result<LegacyGetResult> {
        let task = self
            .pending_tasks
            .remove(handle)
            .ok_or(Error::UnknownHandle { handle })?;
        task.wait();
        let result = task.take_result();
        tracing::trace!(
            handle,
            status = %result.status,
            built = result.data_was_built,
            "async results retrieved"
        );
        Ok(result)
    }

    /// Store data under a prebuilt key without waiting for the store
    pub fn put_by_key(&self, cache_key: &str, data: &[u8], debug_context: &str) -> Result<()> {
        let key = self.legacy_key(cache_key)?;
        tracing::trace!(key = %cache_key, context = %debug_context, size = data.len(), "put");
        let _span = tracing::debug_span!("ddc_put", key = %key).entered();
        dispatch_put(
            &self.context,
            debug_context.to_string(),
            key,
            Bytes::copy_from_slice(data),
        );
        Ok(())
    }

    /// Remove the key from stores that hold transient data
    pub fn mark_transient(&self, cache_key: &str) -> Result<()> {
        let key = self.legacy_key(cache_key)?;
        let name = key.full_key().to_string();
        let mut request = LegacyDeleteRequest::new(name, key);
        request.transient = true;
        let owner = self.new_owner(Priority::Blocking);
        let responses = call_blocking(&owner.handle(), |child, on_complete| {
            self.root()
                .legacy_delete(std::slice::from_ref(&request), child, on_complete)
        });
        if responses.iter().all(|response| response.status != Status::Ok) {
            tracing::debug!(key = %cache_key, "no store removed the transient entry");
        }
        Ok(())
    }

    /// Query without fetching data
    pub fn cached_data_probably_exists(&self, cache_key: &str) -> Result<bool> {
        Ok(self
            .cached_data_probably_exists_batch(&[cache_key])?
            .get(0))
    }

    /// One existence bit per key
    pub fn cached_data_probably_exists_batch<K: AsRef<str>>(&self, cache_keys: &[K]) -> Result<ExistenceBits> {
        if cache_keys.is_empty() {
            return Ok(ExistenceBits::new(0));
        }
        let requests = cache_keys
            .iter()
            .enumerate()
            .map(|(index, cache_key)| {
                let key = self.legacy_key(cache_key.as_ref())?;
                let name = key.full_key().to_string();
                Ok(LegacyGetRequest::new(name, key)
                    .with_policy(CachePolicy::QUERY | CachePolicy::SKIP_DATA)
                    .with_user_data(index as u64))
            })
            .collect::<Result<Vec<_>>>()?;

        // Completions run concurrently and may touch bits in the same word
        let bits = Arc::new(Mutex::new(ExistenceBits::new(cache_keys.len())));
        let sink = bits.clone();
        let on_complete: OnComplete<LegacyGetResponse> = Arc::new(move |response| {
            sink.lock()
                .set(response.user_data() as usize, response.status == Status::Ok);
        });
        let owner = self.new_owner(Priority::Blocking);
        self.root().legacy_get(&requests, &owner, on_complete);
        owner.wait();
        let bits = bits.lock().clone();
        Ok(bits)
    }

    /// True for an empty list, otherwise true iff every key probably exists
    pub fn all_cached_data_probably_exists<K: AsRef<str>>(&self, cache_keys: &[K]) -> Result<bool> {
        if cache_keys.is_empty() {
            return Ok(true);
        }
        Ok(self.cached_data_probably_exists_batch(cache_keys)?.all_set())
    }

    /// Pull the keys toward the local stores without returning data
    ///
    /// True for an empty list, otherwise true iff every key was found.
    pub fn try_to_prefetch<K: AsRef<str>>(&self, cache_keys: &[K], debug_context: &str) -> Result<bool> {
        if cache_keys.is_empty() {
            return Ok(true);
        }
        tracing::trace!(
            count = cache_keys.len(),
            first = cache_keys[0].as_ref(),
            context = %debug_context,
            "try to prefetch"
        );
        let requests = cache_keys
            .iter()
            .enumerate()
            .map(|(index, cache_key)| {
                Ok(LegacyGetRequest::new(debug_context, self.legacy_key(cache_key.as_ref())?)
                    .with_policy(CachePolicy::DEFAULT | CachePolicy::SKIP_DATA)
                    .with_user_data(index as u64))
            })
            .collect::<Result<Vec<_>>>()?;

        let all_ok = Arc::new(AtomicBool::new(true));
        let sink = all_ok.clone();
        let on_complete: OnComplete<LegacyGetResponse> = Arc::new(move |response| {
            if response.status != Status::Ok {
                sink.store(false, Ordering::Relaxed);
            }
        });
        let owner = self.new_owner(Priority::Blocking);
        self.root().legacy_get(&requests, &owner, on_complete);
        owner.wait();
        Ok(all_ok.load(Ordering::Relaxed))
    }
}
