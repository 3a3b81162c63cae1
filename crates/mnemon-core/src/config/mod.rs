//! Configuration management for mnemon.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (`~/.mnemon/config.toml`)
//! 3. Environment variable overrides (`MNEMON_` prefix, plus the plugin
//!    credentials `GEMINI_API_KEY` and `LOCAL_STORAGE_ROOT_PATH`)

mod defaults;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level configuration for a mnemon host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Broker endpoints and toggles.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Vector retrieval cardinality.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Language-model plugin settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding plugin settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Local storage roots for the vector and document stores.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observation merge filters.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// Runtime tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            consolidation: ConsolidationConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Broker endpoints, in `tcp://host:port` form (`*` binds all interfaces).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Inbound endpoint publishers push frames to.
    #[serde(default = "defaults::pull_endpoint")]
    pub pull_endpoint: String,

    /// Outbound endpoint subscribers connect to.
    #[serde(default = "defaults::pub_endpoint")]
    pub pub_endpoint: String,

    /// Whether the host runs the broker at all. Tests that only need the
    /// in-process fast path turn this off.
    #[serde(default = "defaults::broker_enabled")]
    pub enabled: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pull_endpoint: defaults::pull_endpoint(),
            pub_endpoint: defaults::pub_endpoint(),
            enabled: defaults::broker_enabled(),
        }
    }
}

/// Vector retrieval cardinality and distance cut-off.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Maximum candidates returned per lookup index.
    #[serde(default = "defaults::n_results")]
    pub n_results: usize,

    /// Distance threshold; smaller is closer.
    #[serde(default = "defaults::threshold")]
    pub threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: defaults::n_results(),
            threshold: defaults::threshold(),
        }
    }
}

/// Language-model plugin settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider name; `gemini` is the only standard-profile provider.
    #[serde(default = "defaults::llm_provider")]
    pub provider: String,

    /// Model identifier.
    #[serde(default = "defaults::llm_model")]
    pub model: String,

    /// API key; falls back to the environment variable in `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset.
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: String,

    /// Override base URL (used by tests).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: defaults::llm_provider(),
            model: defaults::llm_model(),
            api_key: None,
            api_key_env: defaults::api_key_env(),
            base_url: None,
        }
    }
}

/// Embedding plugin settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Model identifier.
    #[serde(default = "defaults::embedding_model")]
    pub model: String,

    /// Fixed output dimensionality of the embedding plugin.
    #[serde(default = "defaults::embedding_dimensions")]
    pub dimensions: usize,

    /// Override base URL (used by tests).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: defaults::embedding_model(),
            dimensions: defaults::embedding_dimensions(),
            base_url: None,
        }
    }
}

/// Local storage roots.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for the vector and document stores.
    #[serde(default = "defaults::root_path")]
    pub root_path: String,

    /// Document database file name under the root.
    #[serde(default = "defaults::database_file")]
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: defaults::root_path(),
            database_file: defaults::database_file(),
        }
    }
}

/// Observation merge filters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsolidationConfig {
    /// Engrams must score strictly above this accuracy to survive a merge.
    #[serde(default = "defaults::accuracy_floor")]
    pub accuracy_floor: i64,

    /// Engrams must score strictly above this relevancy to survive a merge.
    #[serde(default = "defaults::relevancy_floor")]
    pub relevancy_floor: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            accuracy_floor: defaults::accuracy_floor(),
            relevancy_floor: defaults::relevancy_floor(),
        }
    }
}

/// Runtime tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Grace window for in-flight joins at shutdown, in milliseconds.
    #[serde(default = "defaults::join_grace_ms")]
    pub join_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            join_grace_ms: defaults::join_grace_ms(),
        }
    }
}

impl Config {
    /// Default config file path (`~/.mnemon/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemon")
            .join("config.toml")
    }

    /// Load configuration: defaults, then the TOML file if it exists, then
    /// environment overrides. Validates before returning.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let contents =
                    std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                        path: p.display().to_string(),
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::ParseError { source })?
            }
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    let contents = std::fs::read_to_string(&default_path).map_err(|_| {
                        ConfigError::FileNotFound {
                            path: default_path.display().to_string(),
                        }
                    })?;
                    toml::from_str(&contents)
                        .map_err(|source| ConfigError::ParseError { source })?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var("MNEMON_BROKER_PULL_ENDPOINT") {
            self.broker.pull_endpoint = endpoint;
        }
        if let Ok(endpoint) = env::var("MNEMON_BROKER_PUB_ENDPOINT") {
            self.broker.pub_endpoint = endpoint;
        }
        if let Ok(model) = env::var("MNEMON_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = env::var(&self.llm.api_key_env) {
            if !key.is_empty() && self.llm.api_key.is_none() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(root) = env::var("LOCAL_STORAGE_ROOT_PATH") {
            if !root.is_empty() {
                self.storage.root_path = root;
            }
        }
    }

    /// Validate field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.n_results == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.n_results".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retrieval.threshold <= 0.0 || self.retrieval.threshold.is_nan() {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.threshold".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimensions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (field, endpoint) in [
            ("broker.pull_endpoint", &self.broker.pull_endpoint),
            ("broker.pub_endpoint", &self.broker.pub_endpoint),
        ] {
            if parse_endpoint(endpoint).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("'{endpoint}' is not a tcp://host:port endpoint"),
                });
            }
        }
        Ok(())
    }
}

/// Parse a `tcp://host:port` endpoint into a bindable socket address string.
/// A `*` host binds all interfaces.
pub fn parse_endpoint(endpoint: &str) -> Option<String> {
    let rest = endpoint.strip_prefix("tcp://")?;
    let (host, port) = rest.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    let host = if host == "*" { "0.0.0.0" } else { host };
    if host.is_empty() {
        return None;
    }
    Some(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.n_results, 2);
        assert!((config.retrieval.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.broker.pull_endpoint, "tcp://*:5556");
        assert_eq!(config.broker.pub_endpoint, "tcp://127.0.0.1:5557");
    }

    #[test]
    fn parse_endpoint_handles_wildcard() {
        assert_eq!(
            parse_endpoint("tcp://*:5556").as_deref(),
            Some("0.0.0.0:5556")
        );
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:5557").as_deref(),
            Some("127.0.0.1:5557")
        );
    }

    #[test]
    fn parse_endpoint_rejects_garbage() {
        assert!(parse_endpoint("udp://x:1").is_none());
        assert!(parse_endpoint("tcp://nohost").is_none());
        assert!(parse_endpoint("tcp://:notaport").is_none());
    }

    #[test]
    fn invalid_n_results_is_rejected() {
        let mut config = Config::default();
        config.retrieval.n_results = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieval.n_results"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let mut config = Config::default();
        config.broker.pull_endpoint = "not-an-endpoint".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker.pull_endpoint"));
    }

    #[test]
    fn toml_roundtrip_with_partial_file() {
        let parsed: Config = toml::from_str(
            r#"
            [retrieval]
            n_results = 4

            [llm]
            model = "gemini-2.5-pro"
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.retrieval.n_results, 4);
        assert_eq!(parsed.llm.model, "gemini-2.5-pro");
        // Untouched sections keep their defaults.
        assert!((parsed.retrieval.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(parsed.storage.root_path, "local_storage");
    }

    #[test]
    fn load_missing_explicit_file_errors() {
        let err = Config::load(Some(std::path::Path::new("/definitely/not/here.toml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }
}
