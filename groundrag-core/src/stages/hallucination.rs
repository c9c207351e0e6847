//! Verifies that an answer is supported by its grounding passages.

use super::{absorb, flag, structured_request};
use crate::brain::Brain;
use crate::error::PipelineError;
use crate::prompts::{HALLUCINATION, format_grounding};
use crate::types::{Answer, OutputSchema, SupportVerdict};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

fn support_schema() -> OutputSchema {
    OutputSchema::new(
        "support",
        json!({
            "type": "object",
            "properties": {"grounded": {"type": "boolean"}},
            "required": ["grounded"],
            "additionalProperties": false
        }),
    )
}

pub struct HallucinationChecker {
    brain: Arc<Brain>,
}

impl HallucinationChecker {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Anything short of an explicit `grounded: true` is `Unsupported`.
    pub async fn check(&self, answer: &Answer) -> Result<SupportVerdict, PipelineError> {
        let documents = format_grounding(&answer.grounding);
        let prompt = HALLUCINATION.render(&[("documents", &documents), ("answer", &answer.text)]);

        let verdict = match self
            .brain
            .complete(structured_request(prompt, support_schema()))
            .await
        {
            Ok(response) => match response.structured.as_ref().and_then(|v| flag(v, "grounded")) {
                Some(true) => SupportVerdict::Grounded,
                _ => SupportVerdict::Unsupported,
            },
            Err(err) => {
                absorb("hallucination_checker", err)?;
                SupportVerdict::Unsupported
            }
        };
        debug!(%verdict, "Answer checked");
        Ok(verdict)
    }
}
