//! Cached payloads

use crate::key::{CacheHash, CacheKey, ValueId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single raw byte buffer with its hash and size
///
/// The hash and size are always present. The bytes may be absent when the
/// value was fetched with [`CachePolicy::SKIP_DATA`](crate::CachePolicy::SKIP_DATA).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Bytes>,
    raw_hash: CacheHash,
    raw_size: u64,
}

impl CacheValue {
    /// Wrap a buffer, hashing it
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            raw_hash: CacheHash::of(&data),
            raw_size: data.len() as u64,
            data: Some(data),
        }
    }

    /// A value that carries only its hash and size
    pub fn without_data(raw_hash: CacheHash, raw_size: u64) -> Self {
        Self {
            data: None,
            raw_hash,
            raw_size,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn raw_hash(&self) -> CacheHash {
        self.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    /// Drop the bytes, keeping hash and size
    pub fn remove_data(&self) -> Self {
        Self::without_data(self.raw_hash, self.raw_size)
    }

    /// Slice `[offset, offset + size)` of the raw bytes, clamped to the end
    pub fn chunk(&self, offset: u64, size: u64) -> Option<Bytes> {
        let data = self.data.as_ref()?;
        let start = usize::try_from(offset).ok()?;
        if start > data.len() {
            return None;
        }
        let end = usize::try_from(offset.saturating_add(size))
            .unwrap_or(usize::MAX)
            .min(data.len());
        Some(data.slice(start..end))
    }
}

/// A keyed collection of values plus optional metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<ValueId, CacheValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl CacheRecord {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            values: BTreeMap::new(),
            meta: None,
        }
    }

    /// Attach a value; a null id is ignored
    pub fn with_value(mut self, id: ValueId, value: CacheValue) -> Self {
        self.add_value(id, value);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn add_value(&mut self, id: ValueId, value: CacheValue) {
        if id.is_valid() {
            self.values.insert(id, value);
        }
    }

    pub fn value(&self, id: &ValueId) -> Option<&CacheValue> {
        self.values.get(id)
    }

    pub fn values(&self) -> impl Iterator<Item = (&ValueId, &CacheValue)> {
        self.values.iter()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Total raw size of every attached value
    pub fn raw_size(&self) -> u64 {
        self.values.values().map(CacheValue::raw_size).sum()
    }

    /// Copy of this record whose values carry no bytes
    pub fn remove_data(&self) -> Self {
        Self {
            key: self.key.clone(),
            values: self
                .values
                .iter()
                .map(|(id, v)| (*id, v.remove_data()))
                .collect(),
            meta: self.meta.clone(),
        }
    }

    /// Whether every value carries its bytes
    pub fn is_complete(&self) -> bool {
        self.values.values().all(CacheValue::has_data)
    }
}
