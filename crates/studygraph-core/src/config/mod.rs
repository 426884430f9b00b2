//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Studygraph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub graph: GraphConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum confidence for a relation to be persisted
    pub relation_confidence_min: f64,
    /// Age of the latest done job beyond which a workspace counts as stale
    pub staleness_hours: i64,
    pub full_chunk_size: usize,
    pub quick_chunk_size: usize,
    pub chunk_overlap: usize,
    /// Byte cap on fetched full-document text
    pub max_doc_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub cache_ttl_seconds: u64,
    pub canonical_dedupe: bool,
    pub include_variants: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            graph: GraphConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            relation_confidence_min: 0.58,
            staleness_hours: 12,
            full_chunk_size: 1200,
            quick_chunk_size: 700,
            chunk_overlap: 140,
            max_doc_bytes: 400_000,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 30,
            canonical_dedupe: true,
            include_variants: true,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("STUDYGRAPH_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "AI API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("STUDYGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("studygraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.ai.enforce_env_only()?;
        if !(0.0..=1.0).contains(&self.extraction.relation_confidence_min) {
            return Err(anyhow!("relation_confidence_min must be between 0.0 and 1.0"));
        }
        if self.extraction.chunk_overlap >= self.extraction.quick_chunk_size {
            return Err(anyhow!("chunk_overlap must be smaller than quick_chunk_size"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "extraction.relation_confidence_min" => {
                Ok(self.extraction.relation_confidence_min.to_string())
            }
            "extraction.staleness_hours" => Ok(self.extraction.staleness_hours.to_string()),
            "extraction.full_chunk_size" => Ok(self.extraction.full_chunk_size.to_string()),
            "extraction.quick_chunk_size" => Ok(self.extraction.quick_chunk_size.to_string()),
            "extraction.chunk_overlap" => Ok(self.extraction.chunk_overlap.to_string()),
            "extraction.max_doc_bytes" => Ok(self.extraction.max_doc_bytes.to_string()),

            "graph.cache_ttl_seconds" => Ok(self.graph.cache_ttl_seconds.to_string()),
            "graph.canonical_dedupe" => Ok(self.graph.canonical_dedupe.to_string()),
            "graph.include_variants" => Ok(self.graph.include_variants.to_string()),

            "ai.base_url" => Ok(self.ai.base_url.clone()),
            "ai.embedding_model" => Ok(self.ai.embedding_model.clone()),
            "ai.chat_model" => Ok(self.ai.chat_model.clone()),
            "ai.timeout_secs" => Ok(self.ai.timeout_secs.to_string()),

            // API key (special handling - show redacted)
            "ai.api_key" | "api_key" => match self.ai.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use STUDYGRAPH_API_KEY or OPENAI_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `studygraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "extraction.relation_confidence_min" => {
                let gate: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid relation_confidence_min value: {}", value))?;
                if !(0.0..=1.0).contains(&gate) {
                    return Err(anyhow!("relation_confidence_min must be between 0.0 and 1.0"));
                }
                self.extraction.relation_confidence_min = gate;
            }
            "extraction.staleness_hours" => {
                let hours: i64 = value
                    .parse()
                    .with_context(|| format!("Invalid staleness_hours value: {}", value))?;
                if hours <= 0 {
                    return Err(anyhow!("staleness_hours must be positive"));
                }
                self.extraction.staleness_hours = hours;
            }
            "extraction.full_chunk_size" => {
                self.extraction.full_chunk_size = value
                    .parse()
                    .with_context(|| format!("Invalid full_chunk_size value: {}", value))?;
            }
            "extraction.quick_chunk_size" => {
                self.extraction.quick_chunk_size = value
                    .parse()
                    .with_context(|| format!("Invalid quick_chunk_size value: {}", value))?;
            }
            "extraction.chunk_overlap" => {
                self.extraction.chunk_overlap = value
                    .parse()
                    .with_context(|| format!("Invalid chunk_overlap value: {}", value))?;
            }
            "extraction.max_doc_bytes" => {
                self.extraction.max_doc_bytes = value
                    .parse()
                    .with_context(|| format!("Invalid max_doc_bytes value: {}", value))?;
            }

            "graph.cache_ttl_seconds" => {
                self.graph.cache_ttl_seconds = value
                    .parse()
                    .with_context(|| format!("Invalid cache_ttl_seconds value: {}", value))?;
            }
            "graph.canonical_dedupe" => {
                self.graph.canonical_dedupe = value
                    .parse()
                    .with_context(|| format!("Invalid canonical_dedupe value: {}", value))?;
            }
            "graph.include_variants" => {
                self.graph.include_variants = value
                    .parse()
                    .with_context(|| format!("Invalid include_variants value: {}", value))?;
            }

            "ai.base_url" => {
                self.ai.base_url = value.trim_end_matches('/').to_string();
            }
            "ai.embedding_model" => {
                self.ai.embedding_model = value.to_string();
            }
            "ai.chat_model" => {
                self.ai.chat_model = value.to_string();
            }
            "ai.timeout_secs" => {
                self.ai.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            // API key cannot be set via config
            "ai.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the STUDYGRAPH_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `studygraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "extraction.relation_confidence_min",
            "extraction.staleness_hours",
            "extraction.full_chunk_size",
            "extraction.quick_chunk_size",
            "extraction.chunk_overlap",
            "extraction.max_doc_bytes",
            "graph.cache_ttl_seconds",
            "graph.canonical_dedupe",
            "graph.include_variants",
            "ai.base_url",
            "ai.embedding_model",
            "ai.chat_model",
            "ai.timeout_secs",
            "ai.api_key",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.extraction.relation_confidence_min, 0.58);
        assert_eq!(config.extraction.staleness_hours, 12);
        assert_eq!(config.extraction.full_chunk_size, 1200);
        assert_eq!(config.extraction.quick_chunk_size, 700);
        assert_eq!(config.extraction.chunk_overlap, 140);
        assert_eq!(config.graph.cache_ttl_seconds, 30);
        assert!(config.graph.canonical_dedupe);
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut config = Config::default();
        config.set("extraction.relation_confidence_min", "0.7").unwrap();
        assert_eq!(config.get("extraction.relation_confidence_min").unwrap(), "0.7");

        config.set("graph.canonical_dedupe", "false").unwrap();
        assert_eq!(config.get("graph.canonical_dedupe").unwrap(), "false");
    }

    #[test]
    fn test_set_rejects_out_of_range_gate() {
        let mut config = Config::default();
        assert!(config.set("extraction.relation_confidence_min", "1.5").is_err());
        assert!(config.set("extraction.staleness_hours", "0").is_err());
    }

    #[test]
    fn test_api_key_cannot_be_stored() {
        let mut config = Config::default();
        assert!(config.set("ai.api_key", "sk-secret").is_err());

        config.ai.api_key = Some("sk-secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let config = Config::default();
        assert!(config.get("nope.nothing").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        // Serialize through toml the same way save()/load() do, without
        // touching process-global env vars.
        let mut config = Config::default();
        config.extraction.staleness_hours = 24;
        let contents = toml::to_string_pretty(&config).unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, &contents).unwrap();

        let loaded: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.extraction.staleness_hours, 24);
        assert!(loaded.ai.api_key.is_none());
    }
}
