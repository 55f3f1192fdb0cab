//! Derived data cache engine
//!
//! Sits between expensive build steps and a graph of cache stores:
//!
//! - a miss builds the data through a [`DataDeriver`] and writes it back
//! - every request runs under a [`RequestOwner`] that can be polled, waited
//!   on or canceled
//! - verify mode rebuilds hits and reports mismatches
//! - the legacy API hands out integer handles for in-flight requests
//!
//! The engine is built once from a [`CacheConfig`] and a root
//! [`CacheStore`]; nothing is global.

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod deriver;
pub mod legacy;
pub mod maintainer;
pub mod metrics;
pub mod owner;
pub mod pool;
pub mod store;

pub use backend::CacheBackend;
pub use cache::{DerivedDataCache, ExistenceBits};
pub use config::{CacheConfig, CacheConfigBuilder, CacheConfigLoader, ConfigSource};
pub use context::{CacheContext, VerifyMismatch, VerifyMismatchHook};
pub use deriver::DataDeriver;
pub use legacy::{LegacyFetchOrBuildTask, LegacyGetResult};
pub use maintainer::{CacheMaintainer, CacheStoreMaintainer, MaintainerRegistry};
pub use metrics::{
    CacheType, ResourceStat, ResourceStats, TierSummary, UsageStatsNode, UsageSummary,
};
pub use owner::{OwnerHandle, Priority, RequestBarrier, RequestOwner};
pub use pool::{io_worker_threads_hint, WorkerPool};
pub use store::{
    call_blocking, completion_channel, noop_completion, CacheStore, HierarchicalCacheStore,
    MemoryCacheStore, OnComplete, StoreLocation,
};

pub use ddc_core::{Error, Result, Status};
