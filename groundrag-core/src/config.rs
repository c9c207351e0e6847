//! Configuration system for groundrag.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment.
//! Configuration is loaded from `~/.config/groundrag/config.toml` and/or
//! `.groundrag/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub splitter: SplitterConfig,
    pub corpus: CorpusConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl RagConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be at least 1".to_string(),
            });
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.stage_timeout_secs must be at least 1".to_string(),
            });
        }
        if self.pipeline.grading_concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.grading_concurrency must be at least 1".to_string(),
            });
        }
        if self.splitter.chunk_overlap >= self.splitter.chunk_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "splitter.chunk_overlap ({}) must be smaller than splitter.chunk_size ({})",
                    self.splitter.chunk_overlap, self.splitter.chunk_size
                ),
            });
        }
        Ok(())
    }

    /// Collect non-fatal warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.retrieval.validate());
        warnings.extend(self.pipeline.validate());
        warnings
    }
}

/// Language model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "ollama", or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "llama3.1:8b").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Sampling temperature. Grading and verification want determinism.
    pub temperature: f32,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        } else if self.temperature > 0.5 {
            warnings.push(format!(
                "llm.temperature ({}) is high; grading and verification verdicts may be unstable",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("llm.max_tokens is 0; every generation will be empty".to_string());
        }
        warnings
    }
}

/// Embedding provider configuration for the reference index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "local" (hashed term frequency) or "ollama".
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Base URL for remote providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Dimensionality of the local embedder.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            base_url: None,
            dimensions: 256,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of passages requested per retrieval.
    pub top_k: usize,
    /// Weight of the full-text score in hybrid ranking.
    pub full_text_weight: f32,
    /// Weight of the vector similarity score in hybrid ranking.
    pub vector_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 14,
            full_text_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let sum = self.full_text_weight + self.vector_weight;
        if (sum - 1.0).abs() > 0.01 {
            warnings.push(format!(
                "retrieval weights sum to {sum:.2}; combined scores will not be in 0.0-1.0"
            ));
        }
        if self.top_k > 50 {
            warnings.push(format!(
                "retrieval.top_k ({}) is large; every passage costs one grading call",
                self.top_k
            ));
        }
        warnings
    }
}

/// Reasoning-level budgets and per-stage limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How many times an unsupported answer may be regenerated on the same passages.
    pub max_regenerations: u32,
    /// How many keyword refinement passes may re-run retrieval.
    pub max_refinements: u32,
    /// Timeout applied to every external call, in seconds.
    pub stage_timeout_secs: u64,
    /// Number of trailing conversation turns given to the contextualizer.
    pub history_window: usize,
    /// Maximum grading calls in flight at once.
    pub grading_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_regenerations: 1,
            max_refinements: 1,
            stage_timeout_secs: 60,
            history_window: 4,
            grading_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Upper bound on language model calls for one request.
    pub fn max_llm_calls(&self, top_k: usize) -> usize {
        let regenerations = self.max_regenerations as usize;
        let refinements = self.max_refinements as usize;
        1 + (1 + refinements) * top_k + 2 * (1 + regenerations + refinements) + refinements
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_regenerations > 3 {
            warnings.push(format!(
                "pipeline.max_regenerations ({}) is high; each attempt costs two model calls",
                self.max_regenerations
            ));
        }
        if self.history_window == 0 {
            warnings.push(
                "pipeline.history_window is 0; follow-up questions will not be contextualized"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Transport-level retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Passage splitting for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Tokens shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Model whose tokenizer measures chunk size.
    pub tokenizer_model: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            tokenizer_model: "gpt-3.5-turbo".to_string(),
        }
    }
}

/// Corpus location for ingestion at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// File extensions picked up by ingestion.
    pub extensions: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: None,
            extensions: vec!["txt".to_string(), "md".to_string(), "pdf".to_string()],
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

/// Logging configuration consumed by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when neither `RUST_LOG` nor verbosity flags are given.
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling JSON log files; the user data dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Console,
            log_dir: None,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `GROUNDRAG_`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.groundrag/config.toml`)
/// 4. User config (`~/.config/groundrag/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<RagConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "groundrag", "groundrag") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".groundrag").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // GROUNDRAG_PIPELINE__MAX_REGENERATIONS, GROUNDRAG_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("GROUNDRAG_").split("__"));

    let config: RagConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.check()?;
    Ok(config)
}
