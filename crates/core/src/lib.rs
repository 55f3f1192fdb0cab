//! Core value types and errors for the derived-data cache.
//!
//! Nothing in this crate spawns threads or holds locks. It defines the
//! vocabulary shared by the engine and every cache store:
//!
//! - **`key`**: content-addressing keys (`CacheBucket` + `CacheHash`) and
//!   value ids.
//! - **`policy`**: the closed `CachePolicy` flag set.
//! - **`value`**: `CacheValue` and `CacheRecord` payloads.
//! - **`request`**: batch requests, responses and the `Status` taxonomy.
//! - **`legacy`**: string-keyed legacy requests and key construction.
//! - **`errors`**: the `Error` enum for API misuse and configuration
//!   failures. Cache misses are never errors.

pub mod errors;
pub mod key;
pub mod legacy;
pub mod policy;
pub mod request;
pub mod value;

pub use self::{
    errors::{Error, Result},
    key::{CacheBucket, CacheHash, CacheKey, ValueId},
    legacy::{
        build_cache_key, LegacyCacheKey, LegacyDeleteRequest, LegacyDeleteResponse,
        LegacyGetRequest, LegacyGetResponse, LegacyPutRequest, LegacyPutResponse,
        DEFAULT_MAX_KEY_LENGTH,
    },
    policy::CachePolicy,
    request::{
        GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest,
        GetValueResponse, PutRequest, PutResponse, PutValueRequest, PutValueResponse, Status,
        UNBOUNDED_CHUNK_SIZE,
    },
    value::{CacheRecord, CacheValue},
};
