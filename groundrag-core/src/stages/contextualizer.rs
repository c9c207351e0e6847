//! Rewrites follow-up queries into standalone queries.

use super::{absorb, text_request};
use crate::brain::Brain;
use crate::error::PipelineError;
use crate::prompts::{CONTEXTUALIZER, format_history};
use crate::types::ConversationHistory;
use std::sync::Arc;
use tracing::debug;

/// A self-contained query, always produced fresh for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextualizedQuery {
    pub text: String,
    /// Whether a model call was made to produce it.
    pub model_called: bool,
}

pub struct QueryContextualizer {
    brain: Arc<Brain>,
    history_window: usize,
}

impl QueryContextualizer {
    pub fn new(brain: Arc<Brain>, history_window: usize) -> Self {
        Self {
            brain,
            history_window,
        }
    }

    /// Rewrite `query` using the last turns of `history`.
    ///
    /// With no usable history the query is returned unchanged and no call is
    /// made. Empty model output or a soft failure falls back to the raw query.
    pub async fn contextualize(
        &self,
        query: &str,
        history: &ConversationHistory,
    ) -> Result<ContextualizedQuery, PipelineError> {
        let window = history.last(self.history_window);
        if window.is_empty() {
            return Ok(ContextualizedQuery {
                text: query.to_string(),
                model_called: false,
            });
        }

        let history_text = format_history(window);
        let prompt = CONTEXTUALIZER.render(&[("history", &history_text), ("question", query)]);
        let rewritten = match self.brain.complete(text_request(prompt)).await {
            Ok(response) => clean(&response.text),
            Err(err) => {
                absorb("contextualizer", err)?;
                String::new()
            }
        };

        let text = if rewritten.is_empty() {
            query.to_string()
        } else {
            rewritten
        };
        debug!(original = query, contextualized = %text, "Query contextualized");
        Ok(ContextualizedQuery {
            text,
            model_called: true,
        })
    }
}

/// Trim whitespace and one pair of wrapping quotes.
fn clean(text: &str) -> String {
    let trimmed = text.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}
