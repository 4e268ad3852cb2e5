//! Configuration management for pipelines
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (framekeeper.toml)
//! - Environment variables (FRAMEKEEPER__*)
//!
//! ## Example config file (framekeeper.toml):
//! ```toml
//! [cache]
//! policy = "file"
//! dir = ".framekeeper/cache"
//!
//! [loader]
//! delimiter = ";"
//! has_headers = true
//! infer_types = true
//!
//! [logging]
//! filter = "framekeeper=debug"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::CachePolicy;

/// Main configuration for a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default cache stores
    #[serde(default)]
    pub cache: CacheConfig,

    /// File loader defaults
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Log filter for the CLI
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Store given to nodes that do not bring their own
    #[serde(default)]
    pub policy: CachePolicy,

    /// Directory for file caches
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

/// CSV loader defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_true")]
    pub has_headers: bool,

    /// Parse numbers and booleans instead of keeping every cell a string
    #[serde(default = "default_true")]
    pub infer_types: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".framekeeper/cache")
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "warn".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            dir: default_cache_dir(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            has_headers: true,
            infer_types: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "framekeeper.toml",
            ".framekeeper.toml",
            "config/framekeeper.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "framekeeper", "framekeeper") {
            let xdg_config = config_dir.config_dir().join("framekeeper.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("FRAMEKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the cache directory (resolves relative paths)
    pub fn cache_dir(&self) -> PathBuf {
        if self.cache.dir.is_absolute() {
            self.cache.dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.cache.dir)
        }
    }

    /// CSV delimiter as a byte; non-ASCII delimiters fall back to ','
    pub fn csv_delimiter(&self) -> u8 {
        u8::try_from(self.loader.delimiter).unwrap_or(b',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache.policy, CachePolicy::Memory);
        assert_eq!(config.csv_delimiter(), b',');
        assert!(config.loader.infer_types);
    }

    #[test]
    fn test_serialize_config() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("policy = \"memory\""));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[cache]\npolicy = \"file\"\ndir = \"/tmp/fk\"\n\n[loader]\ndelimiter = \";\"\n",
        )
        .unwrap();

        let config = PipelineConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.cache.policy, CachePolicy::File);
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/fk"));
        assert_eq!(config.csv_delimiter(), b';');
        assert!(config.loader.has_headers);
    }
}
