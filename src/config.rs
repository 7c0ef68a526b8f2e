/// Configuration module for studyrag.
///
/// Handles loading, validating, and providing default configuration values.
/// Loaded once at startup; a changed file takes effect on the next process.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./resources.db".to_string()
}

fn default_category_map_path() -> String {
    "./category_mapping.json".to_string()
}

fn default_records_dir() -> String {
    "./output".to_string()
}

fn default_limit() -> usize {
    5
}

fn default_max_limit() -> usize {
    20
}

fn default_model_name() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_max_concurrency() -> usize {
    4
}

fn default_pool_size() -> u32 {
    4
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_category_map_path")]
    pub category_map_path: String,

    /// Directory of `*.json` resource record files used by `build`.
    #[serde(default = "default_records_dir")]
    pub records_dir: String,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Hard cap; larger requested limits are clamped.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Drop matches scoring below this similarity. `None` keeps everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Hashing,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Cap on in-flight embedding requests across the process.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_provider() -> EmbeddingProvider {
    EmbeddingProvider::OpenAi
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            category_map_path: default_category_map_path(),
            records_dir: default_records_dir(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            min_score: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model_name(),
            dimensions: default_dimensions(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.search.default_limit > 0,
            "search.default_limit must be positive"
        );
        anyhow::ensure!(
            self.search.max_limit >= self.search.default_limit,
            "search.max_limit must be at least search.default_limit"
        );
        if let Some(min) = self.search.min_score {
            anyhow::ensure!(
                (0.0..=1.0).contains(&min),
                "search.min_score must be within [0, 1]"
            );
        }
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.embedding.model.trim().is_empty(),
            "embedding.model must not be empty"
        );
        anyhow::ensure!(
            self.embedding.max_retries <= 10,
            "embedding.max_retries must be at most 10"
        );
        anyhow::ensure!(
            self.embedding.timeout_secs > 0,
            "embedding.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.embedding.max_concurrency > 0,
            "embedding.max_concurrency must be positive"
        );
        anyhow::ensure!(self.store.pool_size > 0, "store.pool_size must be positive");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.max_limit, 20);
        assert!(config.search.min_score.is_none());
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"db_path": "./test.db", "embedding": {"provider": "hashing", "dimensions": 256}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.db_path, "./test.db");
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.embedding.dimensions, 256);
        // Other fields should have defaults
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.search.default_limit, 5);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.db_path, "./resources.db");
        assert!(!path.exists(), "template only written for the default path");
    }

    #[test]
    fn test_load_invalid_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.search.max_limit, 20);
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        config.search.default_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.max_limit = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_min_score() {
        let mut config = Config::default();
        config.search.min_score = Some(1.5);
        assert!(config.validate().is_err());
        config.search.min_score = Some(0.4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_embedding() {
        let mut config = Config::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut config = Config::default();
        config.search.min_score = Some(0.3);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.embedding.model, config.embedding.model);
        assert_eq!(parsed.search.min_score, Some(0.3));
    }
}
