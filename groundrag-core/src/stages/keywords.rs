//! Keyword extraction for refinement passes.

use super::{absorb, structured_request};
use crate::brain::Brain;
use crate::error::PipelineError;
use crate::prompts::KEYWORDS;
use crate::types::OutputSchema;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

fn keywords_schema() -> OutputSchema {
    OutputSchema::new(
        "keywords",
        json!({
            "type": "object",
            "properties": {
                "keywords": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["keywords"],
            "additionalProperties": false
        }),
    )
}

pub struct KeywordExtractor {
    brain: Arc<Brain>,
}

impl KeywordExtractor {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    /// Extract ordered, deduplicated keywords from the raw query.
    ///
    /// An empty list (including after a failed call) is a valid result.
    pub async fn extract(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let prompt = KEYWORDS.render(&[("question", query)]);
        let keywords = match self
            .brain
            .complete(structured_request(prompt, keywords_schema()))
            .await
        {
            Ok(response) => response
                .structured
                .as_ref()
                .map(parse_keywords)
                .unwrap_or_default(),
            Err(err) => {
                absorb("keyword_extractor", err)?;
                Vec::new()
            }
        };
        debug!(?keywords, "Keywords extracted");
        Ok(keywords)
    }
}

/// Accept `{"keywords": [...]}` or a bare array. Non-string items are dropped;
/// duplicates are removed case-insensitively keeping the first spelling.
fn parse_keywords(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("keywords") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .filter(|kw| seen.insert(kw.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLanguageModel;
    use crate::config::RetryConfig;
    use crate::error::LlmError;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn setup() -> (Arc<MockLanguageModel>, KeywordExtractor) {
        let model = Arc::new(MockLanguageModel::new());
        let brain = Brain::new(
            model.clone(),
            Duration::from_secs(5),
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        (model, KeywordExtractor::new(Arc::new(brain)))
    }

    #[test]
    fn test_parse_keywords_dedupes_case_insensitively() {
        let parsed = parse_keywords(&json!({"keywords": ["Scope 3", "emissions", "scope 3", " ", 7, "GHG"]}));
        assert_eq!(parsed, vec!["Scope 3", "emissions", "GHG"]);
    }

    #[test]
    fn test_parse_keywords_shapes() {
        assert_eq!(parse_keywords(&json!(["a", "b"])), vec!["a", "b"]);
        assert!(parse_keywords(&json!({"words": ["a"]})).is_empty());
        assert!(parse_keywords(&json!("a, b")).is_empty());
    }

    #[tokio::test]
    async fn test_extract_from_bare_array_text() {
        let (model, extractor) = setup();
        model.queue_response(MockLanguageModel::text_response(
            "[\"scope 3\", \"value chain\"]",
        ));
        let keywords = extractor.extract("What is Scope 3?").await.unwrap();
        assert_eq!(keywords, vec!["scope 3", "value chain"]);
        assert!(model.requests()[0].prompt.contains("What is Scope 3?"));
    }

    #[tokio::test]
    async fn test_failed_call_yields_no_keywords() {
        let (model, extractor) = setup();
        model.queue_error(LlmError::Timeout { timeout_secs: 5 });
        assert!(extractor.extract("q").await.unwrap().is_empty());
    }
}
