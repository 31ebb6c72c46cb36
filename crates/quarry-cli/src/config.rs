use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use quarry_runtime::{AgentConfig, RepositoryConfig, ScoringConfig, SpaceKind, ThreadCacheConfig};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub thread_cache: ThreadCacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_spaces")]
    pub spaces: Vec<SpaceConfig>,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    /// OpenAI-compatible `/v1` root for embeddings (empty = api.openai.com)
    #[serde(default)]
    pub embedding_base_url: String,

    /// Falls back to EMBEDDING_API_KEY, then OPENAI_API_KEY
    #[serde(default)]
    pub embedding_api_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpaceConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SpaceKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    /// redb file holding model weights and the thread cache
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Primary provider: "openai" or "gemini"; the other is the fallback
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub model: String,

    /// Chat-completions URL override for OpenAI-compatible servers
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default)]
    pub gemini_api_key: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Queries per user per UTC day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,

    /// Bearer token; empty disables auth (QUARRY_API_TOKEN also works)
    #[serde(default)]
    pub api_token: String,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_db_path() -> String {
    "~/.quarry/index.db".to_string()
}

fn default_state_path() -> String {
    "~/.quarry/state.redb".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_spaces() -> Vec<SpaceConfig> {
    vec![SpaceConfig {
        name: "general".to_string(),
        kind: SpaceKind::General,
        model: default_embedding_model(),
        dimensions: default_dimensions(),
    }]
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_daily_limit() -> u32 {
    100
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            spaces: default_spaces(),
            repositories: Vec::new(),
            embedding_base_url: String::new(),
            embedding_api_key: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            base_url: String::new(),
            openai_api_key: String::new(),
            gemini_api_key: String::new(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            api_token: String::new(),
            allowed_origins: Vec::new(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Expand a leading `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Config value if set, else the first env var that is set
pub fn secret_or_env(value: &str, vars: &[&str]) -> Option<String> {
    if !value.is_empty() {
        return Some(value.to_string());
    }
    vars.iter()
        .filter_map(|v| std::env::var(v).ok())
        .find(|v| !v.is_empty())
}

/// Load config from file or use defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let content =
        fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;
    let config: Config = toml::from_str(&content).context("Failed to parse TOML config")?;
    Ok(config)
}
