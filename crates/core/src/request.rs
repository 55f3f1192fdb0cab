//! Batch request and response types
//!
//! Every request carries a debug name, a policy and an opaque `user_data`
//! word. Responses are only ever built through `make_response`, which copies
//! the correlating fields from the request so a response can never be paired
//! with the wrong `user_data`. Those fields are private and read through
//! getters, so a response cannot be assembled by hand:
//!
//! ```compile_fail
//! use ddc_core::{CacheBucket, CacheKey, PutValueResponse, Status};
//!
//! let key = CacheKey::for_data(CacheBucket::new("Texture").unwrap(), b"albedo");
//! let response = PutValueResponse {
//!     name: String::new(),
//!     key,
//!     user_data: 7,
//!     status: Status::Ok,
//! };
//! ```

use crate::key::{CacheHash, CacheKey, ValueId};
use crate::policy::CachePolicy;
use crate::value::{CacheRecord, CacheValue};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    Ok,
    /// Generic failure, including a miss
    #[default]
    Error,
    Canceled,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "Ok",
            Status::Error => "Error",
            Status::Canceled => "Canceled",
        })
    }
}

/// Size used by chunk requests to mean "to the end of the value"
pub const UNBOUNDED_CHUNK_SIZE: u64 = u64::MAX;

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_unbounded(value: &u64) -> bool {
    *value == UNBOUNDED_CHUNK_SIZE
}

fn unbounded() -> u64 {
    UNBOUNDED_CHUNK_SIZE
}

fn is_zero_hash(hash: &CacheHash) -> bool {
    hash.is_zero()
}

fn is_null_id(id: &ValueId) -> bool {
    !id.is_valid()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub record: CacheRecord,
    #[serde(default, skip_serializing_if = "CachePolicy::is_default")]
    pub policy: CachePolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResponse {
    name: String,
    key: CacheKey,
    user_data: u64,
    pub status: Status,
}

impl PutRequest {
    pub fn new(name: impl Into<String>, record: CacheRecord) -> Self {
        Self {
            name: name.into(),
            record,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> PutResponse {
        PutResponse {
            name: self.name.clone(),
            key: self.record.key.clone(),
            user_data: self.user_data,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "CachePolicy::is_default")]
    pub policy: CachePolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetResponse {
    name: String,
    /// Holds only the key unless the status is `Ok`
    pub record: CacheRecord,
    user_data: u64,
    pub status: Status,
}

impl GetRequest {
    pub fn new(name: impl Into<String>, key: CacheKey) -> Self {
        Self {
            name: name.into(),
            key,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> GetResponse {
        GetResponse {
            name: self.name.clone(),
            record: CacheRecord::new(self.key.clone()),
            user_data: self.user_data,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutValueRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub key: CacheKey,
    pub value: CacheValue,
    #[serde(default, skip_serializing_if = "CachePolicy::is_default")]
    pub policy: CachePolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutValueResponse {
    name: String,
    key: CacheKey,
    user_data: u64,
    pub status: Status,
}

impl PutValueRequest {
    pub fn new(name: impl Into<String>, key: CacheKey, value: CacheValue) -> Self {
        Self {
            name: name.into(),
            key,
            value,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> PutValueResponse {
        PutValueResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            user_data: self.user_data,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetValueRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "CachePolicy::is_default")]
    pub policy: CachePolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetValueResponse {
    name: String,
    key: CacheKey,
    /// `None` unless the status is `Ok`
    pub value: Option<CacheValue>,
    user_data: u64,
    pub status: Status,
}

impl GetValueRequest {
    pub fn new(name: impl Into<String>, key: CacheKey) -> Self {
        Self {
            name: name.into(),
            key,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> GetValueResponse {
        GetValueResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            value: None,
            user_data: self.user_data,
            status,
        }
    }
}

/// Request for a byte range of a value
///
/// A null `id` addresses a value stored with `put_value`; any other id
/// addresses that value within the record stored under `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChunkRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub key: CacheKey,
    #[serde(default, skip_serializing_if = "is_null_id")]
    pub id: ValueId,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub raw_offset: u64,
    #[serde(default = "unbounded", skip_serializing_if = "is_unbounded")]
    pub raw_size: u64,
    /// Expected hash of the whole value, zero when unknown
    #[serde(default, skip_serializing_if = "is_zero_hash")]
    pub raw_hash: CacheHash,
    #[serde(default, skip_serializing_if = "CachePolicy::is_default")]
    pub policy: CachePolicy,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetChunkResponse {
    name: String,
    key: CacheKey,
    id: ValueId,
    raw_offset: u64,
    /// Size of the returned range; zero unless the status is `Ok`
    pub raw_size: u64,
    pub raw_hash: CacheHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Bytes>,
    user_data: u64,
    pub status: Status,
}

impl GetChunkRequest {
    pub fn new(name: impl Into<String>, key: CacheKey) -> Self {
        Self {
            name: name.into(),
            key,
            id: ValueId::NULL,
            raw_offset: 0,
            raw_size: UNBOUNDED_CHUNK_SIZE,
            raw_hash: CacheHash::ZERO,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> GetChunkResponse {
        GetChunkResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            id: self.id,
            raw_offset: self.raw_offset,
            raw_size: 0,
            raw_hash: self.raw_hash,
            raw_data: None,
            user_data: self.user_data,
            status,
        }
    }
}

/// Builder-style setters shared by every request type
macro_rules! request_setters {
    ($($request:ty),* $(,)?) => {
        $(
            impl $request {
                pub fn with_policy(mut self, policy: CachePolicy) -> Self {
                    self.policy = policy;
                    self
                }

                pub fn with_user_data(mut self, user_data: u64) -> Self {
                    self.user_data = user_data;
                    self
                }
            }
        )*
    };
}

request_setters!(
    PutRequest,
    GetRequest,
    PutValueRequest,
    GetValueRequest,
    GetChunkRequest,
);

/// Getters for the fields a response copies from its request
macro_rules! response_accessors {
    ($($response:ty),* $(,)?) => {
        $(
            impl $response {
                pub fn name(&self) -> &str {
                    &self.name
                }

                /// The originating request's `user_data`
                pub fn user_data(&self) -> u64 {
                    self.user_data
                }
            }
        )*
    };
}

pub(crate) use response_accessors;

response_accessors!(
    PutResponse,
    GetResponse,
    PutValueResponse,
    GetValueResponse,
    GetChunkResponse,
);

macro_rules! response_keys {
    ($($response:ty),* $(,)?) => {
        $(
            impl $response {
                pub fn key(&self) -> &CacheKey {
                    &self.key
                }
            }
        )*
    };
}

response_keys!(PutResponse, PutValueResponse, GetValueResponse, GetChunkResponse);

impl GetResponse {
    pub fn key(&self) -> &CacheKey {
        &self.record.key
    }
}

impl GetChunkResponse {
    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn raw_offset(&self) -> u64 {
        self.raw_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheBucket;

    fn key() -> CacheKey {
        CacheKey::for_data(CacheBucket::new("Texture").unwrap(), b"albedo")
    }

    #[test]
    fn test_responses_carry_user_data() {
        let get = GetRequest::new("albedo", key()).with_user_data(42);
        let response = get.make_response(Status::Error);
        assert_eq!(response.user_data(), 42);
        assert_eq!(response.name(), "albedo");
        assert_eq!(response.key(), &key());
        assert_eq!(response.record.value_count(), 0);

        let mut chunk = GetChunkRequest::new("albedo", key()).with_user_data(7);
        chunk.raw_offset = 16;
        let response = chunk.make_response(Status::Canceled);
        assert_eq!(response.user_data(), 7);
        assert_eq!(response.raw_offset(), 16);
        assert_eq!(response.id(), ValueId::NULL);
        assert_eq!(response.status, Status::Canceled);
        assert!(response.raw_data.is_none());
    }

    #[test]
    fn test_defaults_are_omitted_when_serialized() {
        let request = GetRequest::new("", key());
        let json = serde_json::to_value(&request).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("key"));
        assert!(!object.contains_key("name"));
        assert!(!object.contains_key("policy"));
        assert!(!object.contains_key("user_data"));

        let chunk = GetChunkRequest::new("", key());
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(!json.as_object().unwrap().contains_key("raw_size"));
        let parsed: GetChunkRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.raw_size, UNBOUNDED_CHUNK_SIZE);
    }

    #[test]
    fn test_non_default_fields_survive_serialization() {
        let request = GetValueRequest::new("mip0", key())
            .with_policy(CachePolicy::QUERY | CachePolicy::SKIP_DATA)
            .with_user_data(9);
        let json = serde_json::to_string(&request).unwrap();
        let parsed: GetValueRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }
}
