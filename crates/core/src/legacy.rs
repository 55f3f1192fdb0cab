//! Legacy string-keyed cache types

use crate::errors::{Error, Result};
use crate::key::{CacheBucket, CacheHash, CacheKey};
use crate::policy::CachePolicy;
use crate::request::{response_accessors, Status};
use crate::value::CacheValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Write as _};

/// Default upper bound on the length of a short legacy key
pub const DEFAULT_MAX_KEY_LENGTH: usize = 120;

/// Bucket that every legacy key hashes into
pub const LEGACY_BUCKET: &str = "Legacy";

const SHORT_KEY_SEPARATOR: &str = "__";

/// Join plugin name, version and suffix into a sanitized legacy key
///
/// ASCII alphanumerics and `_` are kept. Any other character is replaced by
/// `$` followed by its code point in lowercase hex.
pub fn build_cache_key(plugin_name: &str, version: &str, suffix: &str) -> String {
    let joined = format!("{plugin_name}_{version}_{suffix}");
    let mut key = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
        } else {
            let _ = write!(key, "${:x}", u32::from(c));
        }
    }
    key
}

/// A legacy key in full and shortened form
///
/// Stores address entries by `key`, the hash of the full key in the
/// [`LEGACY_BUCKET`]. `short_key` is kept for logging and for stores that
/// need a bounded file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegacyCacheKey {
    full_key: String,
    short_key: String,
    key: CacheKey,
}

impl LegacyCacheKey {
    pub fn new(full_key: impl Into<String>, max_key_length: usize) -> Result<Self> {
        let full_key = full_key.into();
        if full_key.is_empty() {
            return Err(Error::invalid_key(full_key, "legacy key cannot be empty"));
        }

        let digest = Sha256::digest(full_key.as_bytes());
        let short_key = if full_key.len() <= max_key_length {
            full_key.clone()
        } else {
            let hash = hex::encode(&digest);
            let mut cut = max_key_length
                .saturating_sub(hash.len() + SHORT_KEY_SEPARATOR.len())
                .min(full_key.len());
            while !full_key.is_char_boundary(cut) {
                cut -= 1;
            }
            let mut short = format!("{}{SHORT_KEY_SEPARATOR}{hash}", &full_key[..cut]);
            short.truncate(max_key_length);
            short
        };

        let bucket = CacheBucket::new(LEGACY_BUCKET)?;
        let key = CacheKey::new(bucket, CacheHash::from_bytes(digest.into()));
        Ok(Self {
            full_key,
            short_key,
            key,
        })
    }

    pub fn full_key(&self) -> &str {
        &self.full_key
    }

    pub fn short_key(&self) -> &str {
        &self.short_key
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_shortened(&self) -> bool {
        self.short_key != self.full_key
    }
}

impl Display for LegacyCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyGetRequest {
    pub name: String,
    pub key: LegacyCacheKey,
    pub policy: CachePolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyGetResponse {
    name: String,
    key: LegacyCacheKey,
    /// `None` unless the status is `Ok`
    pub value: Option<CacheValue>,
    user_data: u64,
    pub status: Status,
}

impl LegacyGetRequest {
    pub fn new(name: impl Into<String>, key: LegacyCacheKey) -> Self {
        Self {
            name: name.into(),
            key,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> LegacyGetResponse {
        LegacyGetResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            value: None,
            user_data: self.user_data,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPutRequest {
    pub name: String,
    pub key: LegacyCacheKey,
    pub value: CacheValue,
    pub policy: CachePolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPutResponse {
    name: String,
    key: LegacyCacheKey,
    user_data: u64,
    pub status: Status,
}

impl LegacyPutRequest {
    pub fn new(name: impl Into<String>, key: LegacyCacheKey, value: CacheValue) -> Self {
        Self {
            name: name.into(),
            key,
            value,
            policy: CachePolicy::DEFAULT,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> LegacyPutResponse {
        LegacyPutResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            user_data: self.user_data,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDeleteRequest {
    pub name: String,
    pub key: LegacyCacheKey,
    pub policy: CachePolicy,
    /// Only drop the entry if the store treats it as transient
    pub transient: bool,
    pub user_data: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDeleteResponse {
    name: String,
    key: LegacyCacheKey,
    user_data: u64,
    pub status: Status,
}

impl LegacyDeleteRequest {
    pub fn new(name: impl Into<String>, key: LegacyCacheKey) -> Self {
        Self {
            name: name.into(),
            key,
            policy: CachePolicy::DEFAULT,
            transient: false,
            user_data: 0,
        }
    }

    pub fn make_response(&self, status: Status) -> LegacyDeleteResponse {
        LegacyDeleteResponse {
            name: self.name.clone(),
            key: self.key.clone(),
            user_data: self.user_data,
            status,
        }
    }
}

macro_rules! legacy_setters {
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

legacy_setters!(LegacyGetRequest, LegacyPutRequest, LegacyDeleteRequest);

response_accessors!(LegacyGetResponse, LegacyPutResponse, LegacyDeleteResponse);

macro_rules! legacy_response_keys {
    ($($response:ty),* $(,)?) => {
        $(
            impl $response {
                pub fn key(&self) -> &LegacyCacheKey {
                    &self.key
                }
            }
        )*
    };
}

legacy_response_keys!(LegacyGetResponse, LegacyPutResponse, LegacyDeleteResponse);
