//! Build objects: the caller-supplied computation run on a cache miss

use ddc_core::build_cache_key;

/// Produces derived data when the cache cannot supply it
///
/// The cache key is made from the plugin name, the version string and a
/// plugin-specific suffix. Changing any of them invalidates every entry the
/// deriver ever wrote.
pub trait DataDeriver: Send {
    fn plugin_name(&self) -> &str;

    fn version_string(&self) -> &str;

    fn plugin_specific_cache_key_suffix(&self) -> String;

    /// Shown in logs next to the cache key
    fn debug_context(&self) -> String {
        String::new()
    }

    /// False if `build` must run on the thread that requested the data
    fn is_build_threadsafe(&self) -> bool {
        true
    }

    /// True if `build` always produces the same bytes for the same key.
    /// Only deterministic derivers are rebuilt in verify mode.
    fn is_deterministic(&self) -> bool {
        false
    }

    fn build(&mut self) -> anyhow::Result<Vec<u8>>;

    fn cache_key(&self) -> String {
        build_cache_key(
            self.plugin_name(),
            self.version_string(),
            &self.plugin_specific_cache_key_suffix(),
        )
    }
}

impl std::fmt::Debug for dyn DataDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDeriver")
            .field("plugin", &self.plugin_name())
            .field("version", &self.version_string())
            .finish()
    }
}
