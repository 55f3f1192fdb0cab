//! Usage statistics tree mirroring the store topology

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Ratio that is `0.0` when the denominator is zero
pub fn safe_divide(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Kind of store a node reports for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CacheType {
    Memory,
    FileSystem,
    Cloud,
    Zen,
    Horde,
    Hierarchical,
    Other,
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheType::Memory => "Memory",
            CacheType::FileSystem => "File System",
            CacheType::Cloud => "Cloud",
            CacheType::Zen => "Zen",
            CacheType::Horde => "Horde",
            CacheType::Hierarchical => "Hierarchical",
            CacheType::Other => "Other",
        })
    }
}

/// Hit and miss counts for one kind of call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub hits: u64,
    pub misses: u64,
    /// Payload bytes moved by hits
    pub bytes: u64,
}

impl CallStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        safe_divide(self.hits, self.total())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub get: CallStats,
    pub put: CallStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SpeedStats {
    pub latency_ms: f64,
    pub read_speed_mbs: f64,
    pub write_speed_mbs: f64,
}

/// One store's statistics plus those of the stores beneath it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStatsNode {
    pub cache_type: CacheType,
    pub cache_name: String,
    pub is_local: bool,
    pub usage: UsageStats,
    pub speed: SpeedStats,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_stats: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UsageStatsNode>,
}

impl UsageStatsNode {
    pub fn new(cache_type: CacheType, cache_name: impl Into<String>, is_local: bool) -> Self {
        Self {
            cache_type,
            cache_name: cache_name.into(),
            is_local,
            usage: UsageStats::default(),
            speed: SpeedStats::default(),
            custom_stats: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Visit this node and every node beneath it, parents first
    pub fn for_each_descendant<'a>(&'a self, visit: &mut impl FnMut(&'a UsageStatsNode)) {
        visit(self);
        for child in &self.children {
            child.for_each_descendant(visit);
        }
    }

    /// Nodes without children, in tree order
    pub fn leaves(&self) -> Vec<&UsageStatsNode> {
        let mut leaves = Vec::new();
        self.for_each_descendant(&mut |node| {
            if node.children.is_empty() {
                leaves.push(node);
            }
        });
        leaves
    }

    /// First leaf matching `predicate`
    pub fn find_leaf(&self, predicate: impl Fn(&UsageStatsNode) -> bool) -> Option<&UsageStatsNode> {
        self.leaves().into_iter().find(|node| predicate(node))
    }
}

/// Lock-free counters a store updates on every call
#[derive(Debug, Default)]
pub struct StoreCounters {
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    get_bytes: AtomicU64,
    get_time_ns: AtomicU64,
    put_hits: AtomicU64,
    put_misses: AtomicU64,
    put_bytes: AtomicU64,
    put_time_ns: AtomicU64,
}

impl StoreCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_get_hit(&self, bytes: u64, elapsed: Duration) {
        self.get_hits.fetch_add(1, Ordering::Relaxed);
        self.get_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.get_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_get_miss(&self, elapsed: Duration) {
        self.get_misses.fetch_add(1, Ordering::Relaxed);
        self.get_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_put_hit(&self, bytes: u64, elapsed: Duration) {
        self.put_hits.fetch_add(1, Ordering::Relaxed);
        self.put_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.put_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_put_miss(&self) {
        self.put_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn usage(&self) -> UsageStats {
        UsageStats {
            get: CallStats {
                hits: self.get_hits.load(Ordering::Relaxed),
                misses: self.get_misses.load(Ordering::Relaxed),
                bytes: self.get_bytes.load(Ordering::Relaxed),
            },
            put: CallStats {
                hits: self.put_hits.load(Ordering::Relaxed),
                misses: self.put_misses.load(Ordering::Relaxed),
                bytes: self.put_bytes.load(Ordering::Relaxed),
            },
        }
    }

    /// Average get latency and throughput derived from the counters
    pub fn speed(&self) -> SpeedStats {
        let usage = self.usage();
        let get_secs = self.get_time_ns.load(Ordering::Relaxed) as f64 / 1e9;
        let put_secs = self.put_time_ns.load(Ordering::Relaxed) as f64 / 1e9;
        let megabytes = |bytes: u64| bytes as f64 / (1024.0 * 1024.0);
        let per_second = |mb: f64, secs: f64| if secs > 0.0 { mb / secs } else { 0.0 };

        SpeedStats {
            latency_ms: if usage.get.total() == 0 {
                0.0
            } else {
                get_secs * 1000.0 / usage.get.total() as f64
            },
            read_speed_mbs: per_second(megabytes(usage.get.bytes), get_secs),
            write_speed_mbs: per_second(megabytes(usage.put.bytes), put_secs),
        }
    }

    /// A leaf node carrying a snapshot of these counters
    pub fn to_node(&self, cache_type: CacheType, name: &str, is_local: bool) -> UsageStatsNode {
        let mut node = UsageStatsNode::new(cache_type, name, is_local);
        node.usage = self.usage();
        node.speed = self.speed();
        node
    }
}
