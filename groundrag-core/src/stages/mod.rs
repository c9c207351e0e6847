//! Reasoning stages of the pipeline.
//!
//! Each stage wraps one kind of language model call. A stage never fails on
//! bad model output: timeouts, unparseable or ambiguous answers degrade to the
//! stage's conservative fallback. Only errors that mean the model service is
//! unusable are returned, as `PipelineError::Infrastructure`.

pub mod contextualizer;
pub mod generator;
pub mod grader;
pub mod hallucination;
pub mod keywords;

pub use contextualizer::{ContextualizedQuery, QueryContextualizer};
pub use generator::{AnswerGenerator, GenerationMode, is_refusal};
pub use grader::DocumentGrader;
pub use hallucination::HallucinationChecker;
pub use keywords::KeywordExtractor;

use crate::error::{LlmError, PipelineError};
use crate::prompts::RenderedPrompt;
use crate::types::{CompletionRequest, OutputSchema};
use serde_json::Value;
use tracing::warn;

/// Return fatal model errors, log and swallow the rest.
pub(crate) fn absorb(stage: &'static str, err: LlmError) -> Result<(), PipelineError> {
    if err.is_fatal() {
        return Err(err.into());
    }
    warn!(stage, error = %err, "Stage degraded to its fallback");
    Ok(())
}

pub(crate) fn text_request(prompt: RenderedPrompt) -> CompletionRequest {
    CompletionRequest::text(prompt.user).with_system(prompt.system)
}

pub(crate) fn structured_request(prompt: RenderedPrompt, schema: OutputSchema) -> CompletionRequest {
    CompletionRequest::structured(prompt.user, schema).with_system(prompt.system)
}

/// Read a yes/no field, tolerating `"yes"`/`"no"` and `"true"`/`"false"` strings.
pub(crate) fn flag(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
