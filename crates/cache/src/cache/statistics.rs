//! Statistics and maintenance surface of the facade

use super::DerivedDataCache;
use crate::context::VerifyMismatch;
use crate::maintainer::CacheMaintainer;
use crate::metrics::{ResourceStat, UsageStatsNode, UsageSummary};
use std::collections::BTreeMap;
use std::sync::Arc;

impl DerivedDataCache {
    /// Root of the usage tree, mirroring the store graph
    pub fn gather_usage_stats(&self) -> UsageStatsNode {
        self.context.backend().usage_stats()
    }

    pub fn gather_resource_stats(&self) -> Vec<ResourceStat> {
        self.context.resource_stats().gather()
    }

    pub fn usage_summary(&self) -> UsageSummary {
        UsageSummary::from_root(self.graph_name(), &self.gather_usage_stats())
    }

    /// Flat numeric attributes for telemetry export
    ///
    /// Resource stats are named `DDC_Resource_<type>_<stat>`, summary values
    /// `DDC_Summary_<stat>`, and each store's custom stats
    /// `<store>_<stat>` with `.` replaced by `_`.
    pub fn gather_analytics(&self) -> BTreeMap<String, f64> {
        let mut attributes = BTreeMap::new();

        for stat in self.gather_resource_stats() {
            let base = format!("DDC_Resource_{}", stat.asset_type.replace(['(', ')'], ""));
            attributes.insert(format!("{base}_BuildCount"), stat.build_count as f64);
            attributes.insert(format!("{base}_BuildTimeSec"), stat.build_time_sec);
            attributes.insert(format!("{base}_BuildSizeMB"), stat.build_size_mb);
            attributes.insert(format!("{base}_LoadCount"), stat.load_count as f64);
            attributes.insert(format!("{base}_LoadTimeSec"), stat.load_time_sec);
            attributes.insert(format!("{base}_LoadSizeMB"), stat.load_size_mb);
        }

        let root = self.gather_usage_stats();
        let summary = UsageSummary::from_root(self.graph_name(), &root);
        let tiers = [
            ("Local", &summary.local),
            ("Shared", &summary.shared),
            ("Cloud", &summary.cloud),
            ("ZenLocal", &summary.zen_local),
            ("ZenRemote", &summary.zen_remote),
        ];
        attributes.insert("DDC_Summary_TotalGetHits".into(), summary.total_get_hits as f64);
        attributes.insert("DDC_Summary_TotalGets".into(), summary.total_gets as f64);
        attributes.insert("DDC_Summary_TotalGetHitPct".into(), summary.total_get_hit_pct);
        attributes.insert("DDC_Summary_GetMissPct".into(), summary.get_miss_pct);
        attributes.insert("DDC_Summary_TotalPuts".into(), summary.total_puts as f64);
        attributes.insert("DDC_Summary_TotalPutHitPct".into(), summary.total_put_hit_pct);
        attributes.insert("DDC_Summary_PutMissPct".into(), summary.put_miss_pct);
        for (tier, stats) in tiers {
            attributes.insert(format!("DDC_Summary_{tier}GetHitPct"), stats.hit_pct);
            attributes.insert(format!("DDC_Summary_{tier}GetTotal"), stats.total as f64);
        }

        root.for_each_descendant(&mut |node| {
            for (name, value) in &node.custom_stats {
                let attribute = format!("{}_{}", node.cache_name, name.replace('.', "_"));
                attributes.insert(attribute, *value as f64);
            }
        });
        attributes
    }

    /// Verify-mode mismatches seen since the cache was created
    pub fn verify_mismatch_count(&self) -> u64 {
        self.context.verify_mismatch_count()
    }

    /// Run `hook` on every verify mismatch, e.g. to fail a cook that must
    /// stay deterministic
    pub fn on_verify_mismatch(&self, hook: impl Fn(&VerifyMismatch) + Send + Sync + 'static) {
        self.context.set_verify_mismatch_hook(Arc::new(hook));
    }

    pub fn maintainer(&self) -> &CacheMaintainer {
        &self.maintainer
    }

    pub fn is_idle(&self) -> bool {
        self.maintainer.is_idle()
    }

    pub fn boost_priority(&self) {
        self.maintainer.boost_priority();
    }

    /// True once every store's background work is done
    pub fn is_finished(&self) -> bool {
        self.is_idle()
    }

    /// Called between deletes by cleanup; `false` asks stores to hurry
    pub fn wait_between_deletes(&self, wait: bool) {
        if !wait {
            self.boost_priority();
        }
    }
}
