//! Configuration types and loading for Murmur services.
//!
//! Configuration is read from `<config-dir>/config.json` (default
//! `~/.murmur/`), with environment variables layered on top:
//!
//! - `MURMUR_GATEWAY_HOST` / `MURMUR_GATEWAY_PORT` - bind address
//! - `OPENAI_API_KEY` - provider credential fallback
//! - `MURMUR_CONFIG_DIR` - override the config directory (useful in tests)
//!
//! Every section has serde defaults, so a missing or partial file yields a
//! fully usable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub prompts: PromptsConfig,
    pub rag: RagConfig,
    pub observability: ObservabilityConfig,
    pub secrets: ApiKeysConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Model used when a request does not specify one.
    pub default_model: String,
    /// Temperature used when a request does not specify one.
    pub default_temperature: f64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            default_temperature: 0.0,
        }
    }
}

/// Prompt template directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub chatbot_dir: String,
    pub rag_dir: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            chatbot_dir: "prompts/chatbot".to_string(),
            rag_dir: "prompts/rag".to_string(),
        }
    }
}

/// Document indexing settings for the RAG mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Character length of one document chunk.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of snippets returned per retrieval.
    pub top_k: usize,
    /// Embedding model used to vectorize chunks and queries.
    pub embedding_model: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 50,
            top_k: 4,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Output format: "json" or "pretty".
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Provider credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeysConfig {
    pub openai: Option<String>,
}

/// Resolve the Murmur configuration directory.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MURMUR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".murmur"))
        .unwrap_or_else(|| PathBuf::from(".murmur"))
}

impl Config {
    /// Load configuration from the default config directory plus environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir())
    }

    /// Load configuration from a specific directory plus environment.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join("config.json");

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Layer environment variables over the file-based configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MURMUR_GATEWAY_HOST") {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var("MURMUR_GATEWAY_PORT") {
            if let Ok(port) = port.parse() {
                self.gateway.port = port;
            }
        }
        if self.secrets.openai.is_none() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                if !key.is_empty() {
                    self.secrets.openai = Some(key);
                }
            }
        }
    }

    /// Get the OpenAI API key, if configured.
    pub fn openai_api_key(&self) -> Option<&str> {
        self.secrets.openai.as_deref().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.providers.default_model, "gpt-4o");
        assert_eq!(config.providers.default_temperature, 0.0);
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 50);
        assert_eq!(config.rag.top_k, 4);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn test_partial_file_keeps_defaults_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "gateway": { "port": 9100 }, "rag": { "top_k": 8 } }"#,
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.rag.top_k, 8);
        assert_eq!(config.rag.chunk_size, 1000);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_api_key_empty_string_treated_as_missing() {
        let mut config = Config::default();
        config.secrets.openai = Some(String::new());
        assert!(config.openai_api_key().is_none());

        config.secrets.openai = Some("sk-test".into());
        assert_eq!(config.openai_api_key(), Some("sk-test"));
    }
}
