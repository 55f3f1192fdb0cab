//! Cache statistics
//!
//! Stores keep lock-free [`StoreCounters`] and report them as a tree of
//! [`UsageStatsNode`]s that mirrors the store graph. [`UsageSummary`]
//! flattens that tree into per-tier hit rates. [`ResourceStats`] counts
//! builds and loads per asset type. None of this feeds back into cache
//! control flow.

pub mod resource;
pub mod summary;
pub mod usage;

pub use resource::{asset_type_from_key, ResourceStat, ResourceStats};
pub use summary::{TierSummary, UsageSummary};
pub use usage::{
    safe_divide, CacheType, CallStats, SpeedStats, StoreCounters, UsageStats, UsageStatsNode,
};
