use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PossumError, PossumResult};

/// Top-level configuration (loaded from possum.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PossumConfig {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub crypto: CryptoConfig,
    pub index: IndexConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding encrypted blocks
    pub bucket: String,
    /// Key prefix for block objects inside the bucket
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed block size in bytes (default: 1 MiB)
    pub block_size: usize,
    /// Blocks processed in parallel (0 = cpu_count)
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// JSON key file holding the block key and tag secret
    pub keys_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// JSON catalog of file, block, and tag records
    pub catalog_path: PathBuf,
    /// Maximum number of terms kept per block
    pub top_n: usize,
    /// Terms must score strictly above this to be indexed
    pub relevance_threshold: f64,
    /// Characters of decoded plaintext kept as the block preview
    pub preview_chars: usize,
    /// Default `min_score` for searches
    pub default_min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl PossumConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> PossumResult<()> {
        if self.pipeline.block_size == 0 {
            return Err(PossumError::Config(
                "pipeline.block_size must be greater than zero".into(),
            ));
        }
        if self.index.top_n == 0 {
            return Err(PossumError::Config(
                "index.top_n must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.index.relevance_threshold) {
            return Err(PossumError::Config(format!(
                "index.relevance_threshold must be in [0, 1), got {}",
                self.index.relevance_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.index.default_min_score) {
            return Err(PossumError::Config(format!(
                "index.default_min_score must be in [0, 1], got {}",
                self.index.default_min_score
            )));
        }
        if self.storage.bucket.is_empty() {
            return Err(PossumError::Config("storage.bucket must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "possum".into(),
            prefix: "blocks".into(),
            enforce_tls: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: 1024 * 1024,
            concurrency: 0,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            keys_file: PathBuf::from("~/.config/possum/keys.json"),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("~/.local/share/possum/catalog.json"),
            top_n: 10,
            relevance_threshold: 0.1,
            preview_chars: 200,
            default_min_score: 0.1,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
endpoint = "https://s3.example.com"
region = "ap-south-1"
bucket = "secure-cloud"
prefix = "vault"
enforce_tls = true

[pipeline]
block_size = 65536
concurrency = 8

[crypto]
keys_file = "/etc/possum/keys.json"

[index]
catalog_path = "/var/lib/possum/catalog.json"
top_n = 5
relevance_threshold = 0.2
preview_chars = 80

[logging]
level = "debug"
format = "json"
"#;
        let config: PossumConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.endpoint, "https://s3.example.com");
        assert_eq!(config.storage.region, "ap-south-1");
        assert_eq!(config.storage.prefix, "vault");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.pipeline.block_size, 65536);
        assert_eq!(config.pipeline.concurrency, 8);
        assert_eq!(config.crypto.keys_file, PathBuf::from("/etc/possum/keys.json"));
        assert_eq!(config.index.top_n, 5);
        assert_eq!(config.index.preview_chars, 80);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let config: PossumConfig = toml::from_str("").unwrap();

        assert_eq!(config.pipeline.block_size, 1024 * 1024);
        assert_eq!(config.pipeline.concurrency, 0);
        assert_eq!(config.index.top_n, 10);
        assert!((config.index.relevance_threshold - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.storage.bucket, "possum");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[pipeline]
block_size = 4096
"#;
        let config: PossumConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.pipeline.block_size, 4096);
        // Defaults
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.index.preview_chars, 200);
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut config = PossumConfig::default();
        config.pipeline.block_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = PossumConfig::default();
        config.index.relevance_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = PossumConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PossumConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.endpoint, parsed.storage.endpoint);
        assert_eq!(config.pipeline.block_size, parsed.pipeline.block_size);
        assert_eq!(config.index.catalog_path, parsed.index.catalog_path);
    }
}
