//! Cache configuration with precedence and validation
//!
//! Values are resolved once, in order: defaults, the JSON config file, the
//! `DDC_*` environment variables and finally command line overrides. The
//! resulting [`CacheConfig`] is consumed by [`DerivedDataCache::new`] and
//! never re-read.
//!
//! [`DerivedDataCache::new`]: crate::DerivedDataCache::new

use crate::pool::io_worker_threads_hint;
use ddc_core::{Error, Result, DEFAULT_MAX_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the JSON config file
pub const CONFIG_FILE_ENV: &str = "DDC_CONFIG";
pub const VERIFY_ENV: &str = "DDC_VERIFY";
pub const WORKER_THREADS_ENV: &str = "DDC_WORKER_THREADS";
pub const MAX_KEY_LENGTH_ENV: &str = "DDC_MAX_KEY_LENGTH";
pub const GRAPH_ENV: &str = "DDC_GRAPH";

const MAX_WORKER_THREADS: usize = 256;
const DEFAULT_GRAPH_NAME: &str = "Default";

/// Resolved engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Rebuild on every hit and compare against the fetched bytes
    pub verify: bool,
    /// Size of the I/O worker pool
    pub worker_threads: usize,
    /// Upper bound on the length of short legacy keys
    pub max_key_length: usize,
    /// Name of the backend graph, reported by `graph_name()`
    pub graph_name: String,
    /// Where the last applied value came from
    #[serde(skip, default = "ConfigSource::default")]
    pub source: ConfigSource,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            verify: false,
            worker_threads: io_worker_threads_hint(),
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            graph_name: DEFAULT_GRAPH_NAME.to_string(),
            source: ConfigSource::Default,
        }
    }
}

impl CacheConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(Error::configuration(format!(
                "worker_threads must be between 1 and {MAX_WORKER_THREADS}, got {}",
                self.worker_threads
            )));
        }
        if self.max_key_length == 0 {
            return Err(Error::configuration("max_key_length must be positive"));
        }
        if self.graph_name.trim().is_empty() {
            return Err(Error::configuration("graph_name cannot be empty"));
        }
        Ok(())
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigSource {
    #[default]
    Default,
    ConfigFile(PathBuf),
    EnvironmentVariable(String),
    CommandLine,
}

/// A partial configuration layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct ConfigLayer {
    verify: Option<bool>,
    worker_threads: Option<usize>,
    max_key_length: Option<usize>,
    graph_name: Option<String>,
}

impl ConfigLayer {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: ConfigLayer,
}

/// Builder for creating cache configurations
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    pub fn with_max_key_length(mut self, length: usize) -> Self {
        self.config.max_key_length = length;
        self
    }

    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        self.config.graph_name = name.into();
        self
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.config.source = source;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration loader that handles precedence
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load configuration using the file named by `DDC_CONFIG`, if any
    pub fn load() -> Result<CacheConfig> {
        let path = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_with_file(path.as_deref())
    }

    /// Load configuration with an explicit config file
    pub fn load_with_file(path: Option<&Path>) -> Result<CacheConfig> {
        let mut config = CacheConfig::default();

        if let Some(path) = path {
            if let Some(layer) = Self::load_from_config_file(path)? {
                Self::merge_layer(&mut config, layer, ConfigSource::ConfigFile(path.into()));
            }
        }

        if let Some((layer, vars)) = Self::load_from_env()? {
            Self::merge_layer(&mut config, layer, ConfigSource::EnvironmentVariable(vars));
        }

        config.validate()?;
        tracing::debug!(?config, "resolved cache configuration");
        Ok(config)
    }

    fn load_from_config_file(path: &Path) -> Result<Option<ConfigLayer>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "cache config file not found");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read config file", e))?;
        let file: ConfigFile = serde_json::from_str(&content)?;
        Ok(Some(file.cache))
    }

    /// Returns the layer and the names of the variables that were set
    fn load_from_env() -> Result<Option<(ConfigLayer, String)>> {
        let mut layer = ConfigLayer::default();
        let mut vars = Vec::new();

        if let Ok(value) = std::env::var(VERIFY_ENV) {
            layer.verify = Some(parse_bool(VERIFY_ENV, &value)?);
            vars.push(VERIFY_ENV);
        }

        if let Ok(value) = std::env::var(WORKER_THREADS_ENV) {
            layer.worker_threads = Some(parse_usize(WORKER_THREADS_ENV, &value)?);
            vars.push(WORKER_THREADS_ENV);
        }

        if let Ok(value) = std::env::var(MAX_KEY_LENGTH_ENV) {
            layer.max_key_length = Some(parse_usize(MAX_KEY_LENGTH_ENV, &value)?);
            vars.push(MAX_KEY_LENGTH_ENV);
        }

        if let Ok(value) = std::env::var(GRAPH_ENV) {
            layer.graph_name = Some(value);
            vars.push(GRAPH_ENV);
        }

        if layer.is_empty() {
            Ok(None)
        } else {
            Ok(Some((layer, vars.join(","))))
        }
    }

    fn merge_layer(config: &mut CacheConfig, layer: ConfigLayer, source: ConfigSource) {
        if let Some(verify) = layer.verify {
            config.verify = verify;
        }
        if let Some(threads) = layer.worker_threads {
            config.worker_threads = threads;
        }
        if let Some(length) = layer.max_key_length {
            config.max_key_length = length;
        }
        if let Some(name) = layer.graph_name {
            config.graph_name = name;
        }
        config.source = source;
    }

    /// Apply command line arguments (highest precedence)
    ///
    /// `verify` is the `-VerifyDDC` switch; `None` leaves the loaded value.
    pub fn apply_cli_args(mut config: CacheConfig, verify: Option<bool>) -> CacheConfig {
        if let Some(verify) = verify {
            config.verify = verify;
            config.source = ConfigSource::CommandLine;
        }
        config
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::configuration(format!(
            "{var} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_usize(var: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::configuration(format!("{var} must be a positive integer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [VERIFY_ENV, WORKER_THREADS_ENV, MAX_KEY_LENGTH_ENV, GRAPH_ENV] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfigBuilder::new()
            .with_verify(true)
            .with_worker_threads(3)
            .with_graph_name("Editor")
            .build()
            .unwrap();

        assert!(config.verify);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_key_length, DEFAULT_MAX_KEY_LENGTH);
        assert_eq!(config.graph_name, "Editor");
    }

    #[test]
    fn test_builder_rejects_zero_threads() {
        assert!(CacheConfigBuilder::new().with_worker_threads(0).build().is_err());
        assert!(CacheConfigBuilder::new().with_graph_name(" ").build().is_err());
    }

    #[test]
    #[serial]
    fn test_config_file_loading() -> Result<()> {
        clear_env();
        let temp_dir = TempDir::new()?;
        let config_file = temp_dir.path().join("ddc.json");
        std::fs::write(
            &config_file,
            r#"{ "cache": { "verify": true, "max_key_length": 200 } }"#,
        )?;

        let config = CacheConfigLoader::load_with_file(Some(&config_file))?;
        assert!(config.verify);
        assert_eq!(config.max_key_length, 200);
        assert_eq!(config.graph_name, DEFAULT_GRAPH_NAME);
        assert_eq!(config.source, ConfigSource::ConfigFile(config_file));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_config_file_uses_defaults() -> Result<()> {
        clear_env();
        let temp_dir = TempDir::new()?;
        let config = CacheConfigLoader::load_with_file(Some(&temp_dir.path().join("none.json")))?;
        assert_eq!(config.source, ConfigSource::Default);
        assert!(!config.verify);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() -> Result<()> {
        clear_env();
        let temp_dir = TempDir::new()?;
        let config_file = temp_dir.path().join("ddc.json");
        std::fs::write(
            &config_file,
            r#"{ "cache": { "verify": true, "graph_name": "FromFile" } }"#,
        )?;

        std::env::set_var(VERIFY_ENV, "false");
        std::env::set_var(GRAPH_ENV, "FromEnv");
        let config = CacheConfigLoader::load_with_file(Some(&config_file));
        clear_env();

        let config = config?;
        assert!(!config.verify);
        assert_eq!(config.graph_name, "FromEnv");
        assert_eq!(
            config.source,
            ConfigSource::EnvironmentVariable(format!("{VERIFY_ENV},{GRAPH_ENV}"))
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_an_error() {
        clear_env();
        std::env::set_var(WORKER_THREADS_ENV, "many");
        let result = CacheConfigLoader::load_with_file(None);
        clear_env();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_cli_args_take_precedence() {
        let config = CacheConfig::default();
        let config = CacheConfigLoader::apply_cli_args(config, Some(true));
        assert!(config.verify);
        assert_eq!(config.source, ConfigSource::CommandLine);

        let unchanged = CacheConfigLoader::apply_cli_args(config.clone(), None);
        assert_eq!(unchanged, config);
    }
}
