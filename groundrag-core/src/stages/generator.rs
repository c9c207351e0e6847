//! Grounded answer generation.

use super::{absorb, text_request};
use crate::brain::Brain;
use crate::error::PipelineError;
use crate::prompts::{GENERATOR, REFUSAL_SENTENCE, REGENERATOR, format_grounding};
use crate::types::{Answer, GradedPassage, SupportVerdict};
use std::sync::Arc;
use tracing::debug;

/// Which template a generation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Initial,
    /// The previous answer over this grounding was found unsupported.
    Regeneration,
}

/// Whether `text` is the fixed refusal sentence.
pub fn is_refusal(text: &str) -> bool {
    let normalize = |s: &str| {
        s.trim()
            .trim_matches(|c: char| c == '"' || c == '\'')
            .trim_end_matches('.')
            .trim()
            .to_lowercase()
    };
    let answer = normalize(text);
    let refusal = normalize(REFUSAL_SENTENCE);
    answer == refusal || (answer.starts_with(&refusal) && answer.len() < refusal.len() + 40)
}

pub struct AnswerGenerator {
    brain: Arc<Brain>,
}

impl AnswerGenerator {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Generate an answer from the relevant passages.
    ///
    /// The result has verdict `Unknown`, or `Unsupported` when the model
    /// refused or the call degraded. An empty grounding set is a contract
    /// violation.
    pub async fn generate(
        &self,
        query: &str,
        grounding: &[GradedPassage],
        mode: GenerationMode,
    ) -> Result<Answer, PipelineError> {
        if grounding.is_empty() {
            return Err(PipelineError::ContractViolation {
                stage: "generator".to_string(),
                message: "called with no relevant passages".to_string(),
            });
        }
        if let Some(irrelevant) = grounding.iter().find(|g| !g.is_relevant()) {
            return Err(PipelineError::ContractViolation {
                stage: "generator".to_string(),
                message: format!("passage {} was graded irrelevant", irrelevant.id()),
            });
        }

        let template = match mode {
            GenerationMode::Initial => GENERATOR,
            GenerationMode::Regeneration => REGENERATOR,
        };
        let documents = format_grounding(grounding);
        let prompt = template.render(&[
            ("refusal", REFUSAL_SENTENCE),
            ("documents", &documents),
            ("question", query),
        ]);

        let text = match self.brain.complete(text_request(prompt)).await {
            Ok(response) => response.text.trim().to_string(),
            Err(err) => {
                absorb("generator", err)?;
                String::new()
            }
        };

        let verdict = if text.is_empty() || is_refusal(&text) {
            SupportVerdict::Unsupported
        } else {
            SupportVerdict::Unknown
        };
        debug!(?mode, %verdict, chars = text.len(), "Answer generated");

        Ok(Answer {
            text,
            grounding: grounding.to_vec(),
            verdict,
        })
    }
}
