//! Per-tier hit-rate summary over a usage tree

use super::usage::{safe_divide, CacheType, SpeedStats, UsageStatsNode};
use serde::Serialize;

/// Get statistics for one tier of the cache graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TierSummary {
    pub hits: u64,
    pub misses: u64,
    pub total: u64,
    pub hit_pct: f64,
    pub speed: SpeedStats,
}

impl TierSummary {
    fn from_node(node: Option<&UsageStatsNode>) -> Self {
        node.map_or_else(Self::default, |node| {
            let get = node.usage.get;
            Self {
                hits: get.hits,
                misses: get.misses,
                total: get.total(),
                hit_pct: safe_divide(get.hits, get.total()),
                speed: node.speed,
            }
        })
    }
}

/// Summary of a usage tree, grouped the way the cook statistics report it
///
/// Only the first leaf of each kind is considered. A local Zen store
/// replaces the local file system store in the `local` tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub graph_name: String,
    pub has_local_cache: bool,
    pub has_shared_cache: bool,
    pub has_cloud_cache: bool,
    pub has_zen_cache: bool,
    pub total_get_hits: u64,
    pub total_get_misses: u64,
    pub total_gets: u64,
    pub total_get_hit_pct: f64,
    pub get_miss_pct: f64,
    pub total_put_hits: u64,
    pub total_put_misses: u64,
    pub total_puts: u64,
    pub total_put_hit_pct: f64,
    pub put_miss_pct: f64,
    pub local: TierSummary,
    pub shared: TierSummary,
    pub zen_local: TierSummary,
    pub zen_remote: TierSummary,
    pub cloud: TierSummary,
}

impl UsageSummary {
    pub fn from_root(graph_name: impl Into<String>, root: &UsageStatsNode) -> Self {
        let local_fs =
            root.find_leaf(|n| n.cache_type == CacheType::FileSystem && n.is_local);
        let shared_fs =
            root.find_leaf(|n| n.cache_type == CacheType::FileSystem && !n.is_local);
        let cloud = root.find_leaf(|n| n.cache_type == CacheType::Cloud);
        let zen_local = root.find_leaf(|n| n.cache_type == CacheType::Zen && n.is_local);
        let zen_remote = root.find_leaf(|n| {
            matches!(n.cache_type, CacheType::Zen | CacheType::Horde) && !n.is_local
        });

        let zen_local_tier = TierSummary::from_node(zen_local);
        let local = if zen_local.is_some() {
            zen_local_tier
        } else {
            TierSummary::from_node(local_fs)
        };

        let get = root.usage.get;
        let put = root.usage.put;
        Self {
            graph_name: graph_name.into(),
            has_local_cache: local_fs.is_some() || zen_local.is_some(),
            has_shared_cache: shared_fs.is_some() || zen_remote.is_some(),
            has_cloud_cache: cloud.is_some(),
            has_zen_cache: zen_local.is_some() || zen_remote.is_some(),
            total_get_hits: get.hits,
            total_get_misses: get.misses,
            total_gets: get.total(),
            total_get_hit_pct: safe_divide(get.hits, get.total()),
            get_miss_pct: safe_divide(get.misses, get.total()),
            total_put_hits: put.hits,
            total_put_misses: put.misses,
            total_puts: put.total(),
            total_put_hit_pct: safe_divide(put.hits, put.total()),
            put_miss_pct: safe_divide(put.misses, put.total()),
            local,
            shared: TierSummary::from_node(shared_fs),
            zen_local: zen_local_tier,
            zen_remote: TierSummary::from_node(zen_remote),
            cloud: TierSummary::from_node(cloud),
        }
    }
}
