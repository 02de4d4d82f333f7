//! Configuration schema for leafcache
//!
//! Configuration is stored at `~/.config/leafcache/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local cache settings
    pub cache: CacheConfig,

    /// Remote store synchronization
    pub upload: UploadConfig,

    /// Worker pool sizes
    pub workers: WorkersConfig,

    /// External model commands
    pub models: ModelsConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory holding one sub-directory per job
    pub root: PathBuf,

    /// Global byte budget enforced by eviction
    pub max_bytes: u64,

    /// Seconds a fetched result stays resident before the job expires
    pub fetched_ttl_secs: u64,

    /// Interval of the background expiry sweep
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    /// Path of the metadata snapshot inside the cache root
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    /// Directory holding per-job artifact namespaces
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Scratch directory handed to the video scanner
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn fetched_ttl(&self) -> Duration {
        Duration::from_secs(self.fetched_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("leafcache"),
            max_bytes: 10 * 1024 * 1024 * 1024,
            fetched_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

/// Remote store upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the remote data store
    pub remote_url: String,

    /// Attempts per artifact before giving up
    pub max_attempts: u32,

    /// Fixed delay between failed attempts
    pub backoff_secs: u64,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Reject uploads whose server checksum differs from the local one
    pub verify_checksum: bool,
}

impl UploadConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:8000".to_string(),
            max_attempts: 10,
            backoff_secs: 15,
            timeout_secs: 120,
            verify_checksum: true,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Concurrent pipeline-stage tasks
    pub stages: usize,

    /// Concurrent upload tasks
    pub uploads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            stages: 5,
            uploads: 8,
        }
    }
}

/// External commands implementing the model contracts
///
/// Each command receives its inputs as arguments and prints the predicted
/// area as a single number on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// `<cmd> <leaf_number> <width,width,...>`
    pub original_area_cmd: Vec<String>,

    /// `<cmd> <video_path> <output_dir> <length>`
    pub simulated_area_cmd: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            original_area_cmd: vec!["leafscan-original".to_string()],
            simulated_area_cmd: vec!["leafscan-simulated".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[upload]"));
        assert!(toml.contains("[workers]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.upload.max_attempts, 10);
        assert_eq!(config.workers.stages, 5);
        assert_eq!(config.workers.uploads, 8);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            max_bytes = 100

            [upload]
            remote_url = "http://store:9000"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.max_bytes, 100);
        assert_eq!(config.cache.fetched_ttl_secs, 3600); // default preserved
        assert_eq!(config.upload.remote_url, "http://store:9000");
        assert_eq!(config.upload.backoff_secs, 15);
    }

    #[test]
    fn cache_paths_live_under_root() {
        let cache = CacheConfig {
            root: PathBuf::from("/var/leafcache"),
            ..CacheConfig::default()
        };
        assert_eq!(cache.snapshot_path(), PathBuf::from("/var/leafcache/meta.json"));
        assert_eq!(cache.artifacts_dir(), PathBuf::from("/var/leafcache/artifacts"));
    }
}
