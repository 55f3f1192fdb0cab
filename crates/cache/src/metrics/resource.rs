//! Build and load counters per asset type

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Totals for one asset type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceStat {
    pub asset_type: String,
    pub build_count: u64,
    pub build_time_sec: f64,
    pub build_size_mb: f64,
    pub load_count: u64,
    pub load_time_sec: f64,
    pub load_size_mb: f64,
}

/// Concurrent collector keyed by asset type
#[derive(Debug, Default)]
pub struct ResourceStats {
    stats: DashMap<String, ResourceStat>,
}

impl ResourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished request; built data counts as a build, fetched
    /// data as a load
    pub fn record(&self, asset_type: &str, built: bool, elapsed: Duration, bytes: usize) {
        let mut entry = self
            .stats
            .entry(asset_type.to_string())
            .or_insert_with(|| ResourceStat {
                asset_type: asset_type.to_string(),
                ..ResourceStat::default()
            });
        let secs = elapsed.as_secs_f64();
        let mb = bytes as f64 / BYTES_PER_MB;
        if built {
            entry.build_count += 1;
            entry.build_time_sec += secs;
            entry.build_size_mb += mb;
        } else {
            entry.load_count += 1;
            entry.load_time_sec += secs;
            entry.load_size_mb += mb;
        }
    }

    /// Snapshot sorted by asset type
    pub fn gather(&self) -> Vec<ResourceStat> {
        let mut stats: Vec<_> = self.stats.iter().map(|e| e.value().clone()).collect();
        stats.sort_by(|a, b| a.asset_type.cmp(&b.asset_type));
        stats
    }
}

/// Asset type reported for a legacy key: the text before the first `_`
pub fn asset_type_from_key(key: &str) -> &str {
    key.split('_').next().unwrap_or(key)
}
