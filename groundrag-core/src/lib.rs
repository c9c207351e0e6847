//! # GroundRAG Core
//!
//! Core library for the GroundRAG question-answering engine.
//! Provides the pipeline orchestrator and its reasoning stages, the language
//! model interface (brain), hybrid retrieval, corpus ingestion, configuration,
//! and the HTTP transport.

pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod pdf;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod splitter;
pub mod stages;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LanguageModel, MockLanguageModel};
pub use config::{RagConfig, load_config};
pub use error::{
    ConfigError, IngestError, LlmError, PipelineError, RagError, Result, RetrievalError,
};
pub use index::HybridIndex;
pub use ingest::{IngestStats, ingest_directory};
pub use pipeline::{
    InsufficientReason, PipelineOrchestrator, PipelineOutcome, PipelineResult, PipelineStats, Stage,
};
pub use retriever::{Retriever, RetrieverAdapter, StaticRetriever};
pub use splitter::{Splitter, TokenSplitter};
pub use types::{
    Answer, CompletionRequest, CompletionResponse, ConversationHistory, ConversationTurn,
    GradedPassage, Passage, PassageMetadata, Query, Relevance, Role, SupportVerdict, TokenUsage,
};
