use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_runs: default_max_concurrent_runs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct SearchConfig {
    /// Without a key the research step runs on the language model alone.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_search_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_search_api_url(),
            max_results: default_max_results(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("max_results", &self.max_results)
            .finish()
    }
}

/// Knobs consumed by the orchestrator itself.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Number of DRAFT/VERIFY attempts a run may make before failing open.
    /// Zero behaves like one: the first draft is refined whatever its verdict.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-invocation bound on every step processor call.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_llm_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_search_api_url() -> String {
    "https://serpapi.com/search.json".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_max_iterations() -> u32 {
    3
}

fn default_step_timeout_secs() -> u64 {
    120
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("scrivener.db")
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("scrivener").required(false));
        }

        // Environment variable overrides with SCRIVENER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("SCRIVENER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(AppError::Config("llm.api_key must not be empty".to_string()));
        }
        if self.pipeline.step_timeout_secs == 0 {
            return Err(AppError::Config(
                "pipeline.step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.server.max_concurrent_runs == 0 {
            return Err(AppError::Config(
                "server.max_concurrent_runs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn llm_api_key(&self) -> &str {
        &self.llm.api_key
    }

    pub fn search_api_key(&self) -> Option<&str> {
        self.search.api_key.as_deref()
    }
}
