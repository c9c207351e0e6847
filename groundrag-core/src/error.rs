//! Error types for the groundrag core.
//!
//! Uses `thiserror` for public API error types with structured variants for
//! the language model, retrieval, ingestion, configuration, and pipeline
//! domains. Each capability error knows whether it is transient (worth a
//! transport-level retry) and whether it is fatal for the whole request.

use std::path::PathBuf;

/// Top-level error type for the groundrag core library.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether this error means a backing service is unreachable, as opposed
    /// to a defect or a cancelled request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, RagError::Pipeline(PipelineError::Infrastructure { .. }))
    }
}

/// Errors from language model interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("Model service unavailable (HTTP {status}): {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Model output did not match schema '{schema}': {message}")]
    MalformedOutput { schema: String, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    /// Transient errors that a transport-level retry may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Timeout { .. }
                | LlmError::Connection { .. }
                | LlmError::ServiceUnavailable { .. }
        )
    }

    /// Errors that mean the model service is unusable for this request.
    ///
    /// Only meaningful once transport retry has given up. Timeouts,
    /// unparseable output and a rejected single request (for example a prompt
    /// over the context window) are a stage's soft failure path; everything
    /// that points at the service itself aborts the request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LlmError::ApiRequest { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::AuthFailed { .. }
                | LlmError::RateLimited { .. }
                | LlmError::Connection { .. }
        )
    }
}

/// Errors from the retrieval capability.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Index is empty")]
    EmptyIndex,

    #[error("Retrieval timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Index error: {message}")]
    Index { message: String },
}

impl RetrievalError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetrievalError::Unavailable { .. } | RetrievalError::Timeout { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RetrievalError::Unavailable { .. } | RetrievalError::Index { .. }
        )
    }
}

/// Errors from corpus ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Corpus directory not found: {path}")]
    CorpusNotFound { path: PathBuf },

    #[error("Failed to read {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("Tokenizer unavailable: {message}")]
    Tokenizer { message: String },

    #[error("Indexing failed: {0}")]
    Index(#[from] RetrievalError),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the orchestration engine itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{service} unavailable: {message}")]
    Infrastructure { service: String, message: String },

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Contract violation in stage {stage}: {message}")]
    ContractViolation { stage: String, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        PipelineError::Infrastructure {
            service: "language model".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<RetrievalError> for PipelineError {
    fn from(err: RetrievalError) -> Self {
        PipelineError::Infrastructure {
            service: "retriever".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `RagError`.
pub type Result<T> = std::result::Result<T, RagError>;
