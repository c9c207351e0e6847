//! Core type definitions for groundrag.
//!
//! Defines the data model shared by the pipeline stages: conversation turns,
//! queries, passages and their grades, answers, and the request/response
//! shapes exchanged with the language model capability.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered, append-only conversation history owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Existing turns are never modified.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `n` turns, oldest first.
    pub fn last(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<ConversationTurn>> for ConversationHistory {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}

/// A user query together with the history it was asked in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub query: String,
    #[serde(default)]
    pub history: ConversationHistory,
}

impl Query {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            history: ConversationHistory::new(),
        }
    }

    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }
}

/// Where a passage came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub document_id: String,
    pub position: usize,
}

/// An immutable passage of the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub metadata: PassageMetadata,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: PassageMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }
}

/// Relevance verdict for a single passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

/// A passage with the grader's verdict attached.
#[derive(Debug, Clone)]
pub struct GradedPassage {
    pub passage: Arc<Passage>,
    pub relevance: Relevance,
    pub rationale: Option<String>,
}

impl GradedPassage {
    pub fn is_relevant(&self) -> bool {
        self.relevance == Relevance::Relevant
    }

    pub fn id(&self) -> &str {
        &self.passage.id
    }
}

/// Whether an answer is supported by its grounding passages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportVerdict {
    Grounded,
    Unsupported,
    #[default]
    Unknown,
}

impl std::fmt::Display for SupportVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupportVerdict::Grounded => write!(f, "grounded"),
            SupportVerdict::Unsupported => write!(f, "unsupported"),
            SupportVerdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// A generated answer and the passages it was generated from.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub grounding: Vec<GradedPassage>,
    pub verdict: SupportVerdict,
}

impl Answer {
    /// Identifiers of the grounding passages, in grounding order.
    pub fn sources(&self) -> Vec<String> {
        self.grounding.iter().map(|g| g.id().to_string()).collect()
    }

    pub fn is_grounded(&self) -> bool {
        self.verdict == SupportVerdict::Grounded
    }
}

/// JSON schema constraining a structured model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// A request to the language model capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Standing instructions, sent as a system message when the backend has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<OutputSchema>,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            system: None,
            prompt: String::new(),
            schema: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn structured(prompt: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            prompt: prompt.into(),
            schema: Some(schema),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A response from the language model capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    /// Parsed JSON output when the request carried a schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    pub usage: TokenUsage,
    pub model: String,
}

/// Token usage for a single request/response pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
