//! Per-passage relevance grading with bounded concurrent fan-out.

use super::{absorb, flag, structured_request};
use crate::brain::Brain;
use crate::error::PipelineError;
use crate::prompts::{GRADER, format_passages};
use crate::types::{GradedPassage, OutputSchema, Passage, Relevance};
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

fn grade_schema() -> OutputSchema {
    OutputSchema::new(
        "grade",
        json!({
            "type": "object",
            "properties": {
                "relevant": {"type": "boolean"},
                "rationale": {"type": "string"}
            },
            "required": ["relevant", "rationale"],
            "additionalProperties": false
        }),
    )
}

pub struct DocumentGrader {
    brain: Arc<Brain>,
    concurrency: usize,
}

impl DocumentGrader {
    pub fn new(brain: Arc<Brain>, concurrency: usize) -> Self {
        Self {
            brain,
            concurrency: concurrency.max(1),
        }
    }

    /// Grade every passage against `query`.
    ///
    /// The output has the same length and order as `passages`. At most
    /// `concurrency` grading calls are in flight at once.
    pub async fn grade(
        &self,
        query: &str,
        passages: &[Arc<Passage>],
    ) -> Result<Vec<GradedPassage>, PipelineError> {
        let graded: Vec<GradedPassage> = stream::iter(passages.iter().cloned())
            .map(|passage| async move { self.grade_one(query, &passage).await })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        debug!(
            total = graded.len(),
            relevant = graded.iter().filter(|g| g.is_relevant()).count(),
            "Passages graded"
        );
        Ok(graded)
    }

    async fn grade_one(
        &self,
        query: &str,
        passage: &Arc<Passage>,
    ) -> Result<GradedPassage, PipelineError> {
        let document = format_passages([passage.as_ref()]);
        let prompt = GRADER.render(&[("document", &document), ("question", query)]);

        let (relevance, rationale) = match self
            .brain
            .complete(structured_request(prompt, grade_schema()))
            .await
        {
            Ok(response) => {
                let value = response.structured.unwrap_or_default();
                let relevance = match flag(&value, "relevant") {
                    Some(true) => Relevance::Relevant,
                    _ => Relevance::Irrelevant,
                };
                let rationale = value
                    .get("rationale")
                    .and_then(|r| r.as_str())
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string);
                (relevance, rationale)
            }
            Err(err) => {
                absorb("grader", err)?;
                (Relevance::Irrelevant, None)
            }
        };

        Ok(GradedPassage {
            passage: Arc::clone(passage),
            relevance,
            rationale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{LanguageModel, MockLanguageModel};
    use crate::config::RetryConfig;
    use crate::error::LlmError;
    use crate::types::{CompletionRequest, CompletionResponse, PassageMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn passages(ids: &[&str]) -> Vec<Arc<Passage>> {
        ids.iter()
            .map(|id| Arc::new(Passage::new(*id, format!("text {id}"), PassageMetadata::default())))
            .collect()
    }

    fn grader(model: Arc<dyn LanguageModel>, concurrency: usize) -> DocumentGrader {
        let brain = Brain::new(
            model,
            Duration::from_secs(5),
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        DocumentGrader::new(Arc::new(brain), concurrency)
    }

    #[tokio::test]
    async fn test_grades_preserve_order_and_length() {
        // p2 is the only relevant passage
        let model = Arc::new(MockLanguageModel::with_handler(|req| {
            let relevant = req.prompt.contains("\"p2\"");
            Ok(MockLanguageModel::json_response(
                json!({"relevant": relevant, "rationale": "checked"}),
            ))
        }));
        let graded = grader(model, 2)
            .grade("q", &passages(&["p1", "p2", "p3"]))
            .await
            .unwrap();

        let ids: Vec<&str> = graded.iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(
            graded.iter().map(|g| g.relevance).collect::<Vec<_>>(),
            vec![Relevance::Irrelevant, Relevance::Relevant, Relevance::Irrelevant]
        );
        assert_eq!(graded[1].rationale.as_deref(), Some("checked"));
    }

    #[tokio::test]
    async fn test_failed_or_ambiguous_grades_are_irrelevant() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_response(MockLanguageModel::json_response(json!({"relevant": "perhaps"})));
        model.queue_error(LlmError::Timeout { timeout_secs: 5 });
        model.queue_response(MockLanguageModel::text_response("not json at all"));
        model.queue_error(LlmError::Rejected {
            status: 400,
            message: "context length exceeded".into(),
        });

        let graded = grader(model, 1)
            .grade("q", &passages(&["p1", "p2", "p3", "p4"]))
            .await
            .unwrap();
        assert_eq!(graded.len(), 4);
        assert!(graded.iter().all(|g| !g.is_relevant()));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_grading() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_error(LlmError::Connection {
            message: "refused".into(),
        });
        let err = grader(model, 1)
            .grade("q", &passages(&["p1", "p2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Infrastructure { .. }));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let model = Arc::new(MockLanguageModel::new());
        let graded = grader(model.clone(), 4).grade("q", &[]).await.unwrap();
        assert!(graded.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    /// Records the peak number of concurrent calls.
    struct ConcurrencyGauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for ConcurrencyGauge {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(MockLanguageModel::json_response(json!({"relevant": true, "rationale": ""})))
        }

        fn model_name(&self) -> &str {
            "gauge"
        }
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let gauge = Arc::new(ConcurrencyGauge {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ids: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let graded = grader(gauge.clone(), 3).grade("q", &passages(&refs)).await.unwrap();

        assert_eq!(graded.len(), 10);
        assert!(graded.iter().all(|g| g.rationale.is_none()));
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 3 && peak >= 2, "peak concurrency was {peak}");
    }
}
