//! Content-addressing keys
//!
//! A [`CacheKey`] is a bucket plus a 32-byte content hash. Both halves are
//! validated on construction and never change afterwards, so equality and
//! hashing are plain structural comparisons.

use crate::errors::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use std::ops::Deref;
use std::str::FromStr;

/// Maximum length of a bucket name
pub const MAX_BUCKET_LENGTH: usize = 63;

/// A validated cache bucket name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheBucket(String);

impl CacheBucket {
    /// Create a new bucket with validation
    ///
    /// Bucket names are 1 to 63 ASCII alphanumerics, underscores or hyphens.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_key(name, "bucket name cannot be empty"));
        }
        if name.len() > MAX_BUCKET_LENGTH {
            return Err(Error::invalid_key(
                name,
                format!("bucket name exceeds {MAX_BUCKET_LENGTH} characters"),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::invalid_key(
                name,
                "bucket name must contain only ASCII alphanumerics, underscores and hyphens",
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for CacheBucket {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for CacheBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for CacheBucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::new(name).map_err(serde::de::Error::custom)
    }
}

/// SHA-256 content hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CacheHash([u8; 32]);

impl CacheHash {
    /// The all-zero hash
    pub const ZERO: Self = Self([0; 32]);

    /// Hash a byte buffer
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Wrap raw hash bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64 character hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| Error::invalid_key(hex_str, format!("invalid hash: {e}")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl Display for CacheHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CacheHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheHash({self})")
    }
}

impl Serialize for CacheHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CacheHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Content-addressing key: bucket plus hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub bucket: CacheBucket,
    pub hash: CacheHash,
}

impl CacheKey {
    pub fn new(bucket: CacheBucket, hash: CacheHash) -> Self {
        Self { bucket, hash }
    }

    /// Key for the hash of `data` in `bucket`
    pub fn for_data(bucket: CacheBucket, data: &[u8]) -> Self {
        Self::new(bucket, CacheHash::of(data))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.hash)
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    /// Parse `bucket/hexhash`
    fn from_str(s: &str) -> Result<Self> {
        let (bucket, hash) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_key(s, "expected 'bucket/hash'"))?;
        Ok(Self::new(CacheBucket::new(bucket)?, CacheHash::from_hex(hash)?))
    }
}

/// Identifier of a value attached to a record
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ValueId([u8; 12]);

impl ValueId {
    /// The null id, never attached to a record
    pub const NULL: Self = Self([0; 12]);

    /// Derive an id from a name
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&digest[..12]);
        Self(bytes)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::NULL
    }
}

impl Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({self})")
    }
}

impl Serialize for ValueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_validation() {
        assert!(CacheBucket::new("Texture").is_ok());
        assert!(CacheBucket::new("shader_cache-v2").is_ok());
        assert!(CacheBucket::new("").is_err());
        assert!(CacheBucket::new("has space").is_err());
        assert!(CacheBucket::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_key_display_parses_back() {
        let key = CacheKey::for_data(CacheBucket::new("Mesh").unwrap(), b"vertices");
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_key_equality_is_structural() {
        let bucket = CacheBucket::new("Audio").unwrap();
        let a = CacheKey::for_data(bucket.clone(), b"wave");
        let b = CacheKey::for_data(bucket.clone(), b"wave");
        let c = CacheKey::for_data(bucket, b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!("nobucket".parse::<CacheKey>().is_err());
        assert!("Mesh/zz".parse::<CacheKey>().is_err());
    }

    #[test]
    fn test_value_id() {
        let id = ValueId::from_name("Payload");
        assert!(id.is_valid());
        assert_eq!(id, ValueId::from_name("Payload"));
        assert!(!ValueId::NULL.is_valid());
    }
}
