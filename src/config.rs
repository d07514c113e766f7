use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngramConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub ai: AiConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Fallback project id when no `X-Project-Id` header is sent.
    pub default_project: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint base URL.
    pub api_url: String,
    pub model: String,
    /// Env var holding the API key. Unset var ⇒ embedder disabled (returns empty).
    pub api_key_env: String,
}

/// Which LLM backs extraction and retrieval expansion.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    /// Prefer primary, then secondary, then simple.
    Auto,
    PrimaryLlm,
    SecondaryLlm,
    Simple,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub mode: AiMode,
    /// Gates the LLM-expanded retrieval pipeline (search only).
    pub use_retrieval_expand: bool,
    /// Optional model override passed through to the selected LLM.
    pub retrieval_model: Option<String>,
    pub primary: LlmEndpointConfig,
    pub secondary: LlmEndpointConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmEndpointConfig {
    pub api_url: String,
    pub model: String,
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Cosine similarity ×100 at or above which a new memory is a duplicate.
    pub duplicate_threshold: f64,
    /// Half-open conflict band [min, max) in cosine ×100.
    pub conflict_min: f64,
    pub conflict_max: f64,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            ai: AiConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8780,
            log_level: "info".into(),
            default_project: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("engram.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            api_key_env: "ENGRAM_EMBEDDING_API_KEY".into(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            mode: AiMode::Auto,
            use_retrieval_expand: true,
            retrieval_model: None,
            primary: LlmEndpointConfig::default(),
            secondary: LlmEndpointConfig {
                api_url: "https://api.openai.com/v1".into(),
                model: "gpt-4o-mini".into(),
                api_key_env: "ENGRAM_SECONDARY_API_KEY".into(),
            },
        }
    }
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "ENGRAM_LLM_API_KEY".into(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 25,
            max_limit: 200,
            duplicate_threshold: 85.0,
            conflict_min: 60.0,
            conflict_max: 85.0,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB, ENGRAM_PORT,
    /// ENGRAM_PROJECT, ENGRAM_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENGRAM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ENGRAM_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("ENGRAM_PROJECT") {
            self.server.default_project = Some(val);
        }
        if let Ok(val) = std::env::var("ENGRAM_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngramConfig::default();
        assert_eq!(config.server.port, 8780);
        assert_eq!(config.retrieval.default_limit, 25);
        assert_eq!(config.retrieval.max_limit, 200);
        assert!((config.retrieval.duplicate_threshold - 85.0).abs() < f64::EPSILON);
        assert!(config.storage.db_path.ends_with("engram.db"));
        assert_eq!(config.ai.mode, AiMode::Auto);
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
port = 9000
default_project = "proj_main"

[storage]
db_path = "/tmp/test.db"

[ai]
mode = "secondary_llm"
use_retrieval_expand = false

[retrieval]
default_limit = 10
"#;
        let config: EngramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.default_project.as_deref(), Some("proj_main"));
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.ai.mode, AiMode::SecondaryLlm);
        assert!(!config.ai.use_retrieval_expand);
        assert_eq!(config.retrieval.default_limit, 10);
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.max_limit, 200);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngramConfig::default();
        std::env::set_var("ENGRAM_DB", "/tmp/override.db");
        std::env::set_var("ENGRAM_PROJECT", "proj_env");
        std::env::set_var("ENGRAM_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.default_project.as_deref(), Some("proj_env"));
        assert_eq!(config.server.log_level, "trace");

        std::env::remove_var("ENGRAM_DB");
        std::env::remove_var("ENGRAM_PROJECT");
        std::env::remove_var("ENGRAM_LOG_LEVEL");
    }
}
