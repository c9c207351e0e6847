//! Brain: language model capability and call discipline.
//!
//! Defines the `LanguageModel` trait every backend implements, and the `Brain`
//! wrapper that the pipeline stages call through. The Brain adds a per-call
//! timeout, transport-level retry with backoff, structured output parsing,
//! and token usage accounting.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::retry::with_retry;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for language model backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion. When the request carries a schema the backend
    /// should constrain its output to it and may fill `structured` itself.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether this backend enforces JSON schemas natively.
    fn supports_structured_output(&self) -> bool {
        false
    }
}

/// The Brain wraps a language model and adds the call discipline shared by
/// every stage. It is shared across concurrent requests.
pub struct Brain {
    model: Arc<dyn LanguageModel>,
    retry: RetryConfig,
    timeout: Duration,
    temperature: f32,
    max_tokens: usize,
    calls: AtomicUsize,
    input_tokens: AtomicUsize,
    output_tokens: AtomicUsize,
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("model", &self.model.model_name())
            .field("timeout", &self.timeout)
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl Brain {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            model,
            retry,
            timeout,
            temperature: 0.0,
            max_tokens: 1024,
            calls: AtomicUsize::new(0),
            input_tokens: AtomicUsize::new(0),
            output_tokens: AtomicUsize::new(0),
        }
    }

    /// Apply the sampling defaults from the LLM configuration.
    pub fn with_generation_defaults(mut self, config: &LlmConfig) -> Self {
        self.temperature = config.temperature;
        self.max_tokens = config.max_tokens;
        self
    }

    /// Send a completion request with timeout and retry, tracking usage.
    ///
    /// Each attempt is bounded by the configured timeout. Transient errors
    /// (rate limits, timeouts, dropped connections, 5xx responses) are retried
    /// with backoff.
    /// When the request carries a schema and the backend returned plain
    /// text, the text is parsed as JSON; failure is `MalformedOutput`.
    pub async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        if request.max_tokens.is_none() {
            request.max_tokens = Some(self.max_tokens);
        }
        request.temperature = self.temperature;
        let schema_name = request.schema.as_ref().map(|s| s.name.clone());

        debug!(
            model = self.model.model_name(),
            schema = schema_name.as_deref().unwrap_or("text"),
            prompt_chars = request.prompt.len(),
            "Sending completion request"
        );

        let timeout = self.timeout;
        let mut response = with_retry(&self.retry, || {
            let attempt = request.clone();
            let model = Arc::clone(&self.model);
            self.calls.fetch_add(1, Ordering::Relaxed);
            async move {
                match tokio::time::timeout(timeout, model.complete(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }),
                }
            }
        })
        .await?;

        self.track_usage(&response.usage);

        if let Some(name) = schema_name
            && response.structured.is_none()
        {
            match parse_structured(&response.text) {
                Some(value) => response.structured = Some(value),
                None => {
                    warn!(schema = name.as_str(), "Model output is not valid JSON");
                    return Err(LlmError::MalformedOutput {
                        schema: name,
                        message: "output is not valid JSON".to_string(),
                    });
                }
            }
        }

        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(response)
    }

    fn track_usage(&self, usage: &TokenUsage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    /// Total token usage across all calls made through this brain.
    pub fn total_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }

    /// Number of backend attempts, retries included.
    pub fn total_attempts(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Extract a JSON value from model text.
///
/// Accepts bare JSON, JSON wrapped in a markdown code fence, or JSON embedded
/// in surrounding prose (first object or array span).
pub fn parse_structured(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced
        && let Ok(value) = serde_json::from_str(inner)
    {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
        {
            return Some(value);
        }
    }
    None
}

type MockHandler =
    Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync>;

/// A scripted language model for tests.
///
/// Queued responses are returned first, in order. Once the queue is empty the
/// handler (if any) answers, otherwise a fixed text is returned. Every request
/// is recorded.
pub struct MockLanguageModel {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    handler: Option<MockHandler>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that answers every request through `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push_back(Err(error));
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Create a simple text response.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            structured: None,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
            model: "mock-model".to_string(),
        }
    }

    /// Create a structured response carrying `value`.
    pub fn json_response(value: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            text: value.to_string(),
            structured: Some(value),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 10,
            },
            model: "mock-model".to_string(),
        }
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if let Some(queued) = self.lock_responses().pop_front() {
            return queued;
        }
        match &self.handler {
            Some(handler) => handler(&request),
            None => Ok(Self::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputSchema;
    use serde_json::json;

    fn test_brain(model: Arc<dyn LanguageModel>) -> Brain {
        Brain::new(
            model,
            Duration::from_secs(5),
            RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        )
    }

    /// A model that never answers within the timeout.
    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(MockLanguageModel::text_response("too late"))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_mock_default_response() {
        let model = MockLanguageModel::new();
        let response = model.complete(CompletionRequest::text("hi")).await.unwrap();
        assert!(response.text.contains("mock"));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_queued_then_handler() {
        let model = MockLanguageModel::with_handler(|req| {
            Ok(MockLanguageModel::text_response(&format!("echo: {}", req.prompt)))
        });
        model.queue_response(MockLanguageModel::text_response("first"));

        let r1 = model.complete(CompletionRequest::text("a")).await.unwrap();
        let r2 = model.complete(CompletionRequest::text("b")).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "echo: b");
        assert_eq!(model.requests()[1].prompt, "b");
    }

    #[tokio::test]
    async fn test_brain_tracks_usage() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_response(MockLanguageModel::text_response("answer"));
        let brain = test_brain(model);

        let response = brain.complete(CompletionRequest::text("q")).await.unwrap();
        assert_eq!(response.text, "answer");
        assert_eq!(brain.total_usage().total(), 120);
        assert_eq!(brain.total_attempts(), 1);
    }

    #[tokio::test]
    async fn test_brain_applies_generation_defaults() {
        let model = Arc::new(MockLanguageModel::new());
        let brain = test_brain(model.clone()).with_generation_defaults(&LlmConfig {
            temperature: 0.2,
            max_tokens: 256,
            ..Default::default()
        });
        brain.complete(CompletionRequest::text("q")).await.unwrap();

        let sent = &model.requests()[0];
        assert_eq!(sent.max_tokens, Some(256));
        assert!((sent.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_brain_retries_transient_errors() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_error(LlmError::Connection {
            message: "reset".into(),
        });
        model.queue_response(MockLanguageModel::text_response("recovered"));
        let brain = test_brain(model.clone());

        let response = brain.complete(CompletionRequest::text("q")).await.unwrap();
        assert_eq!(response.text, "recovered");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_brain_retries_service_unavailable() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_error(LlmError::ServiceUnavailable {
            status: 503,
            message: "overloaded".into(),
        });
        model.queue_response(MockLanguageModel::text_response("recovered"));
        let brain = test_brain(model.clone());

        let response = brain.complete(CompletionRequest::text("q")).await.unwrap();
        assert_eq!(response.text, "recovered");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_brain_gives_up_on_persistent_outage() {
        let model = Arc::new(MockLanguageModel::with_handler(|_| {
            Err(LlmError::ServiceUnavailable {
                status: 502,
                message: "bad gateway".into(),
            })
        }));
        let brain = test_brain(model.clone());

        let err = brain.complete(CompletionRequest::text("q")).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_brain_does_not_retry_rejected_request() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_error(LlmError::Rejected {
            status: 400,
            message: "context length exceeded".into(),
        });
        let brain = test_brain(model.clone());

        let err = brain.complete(CompletionRequest::text("q")).await.unwrap_err();
        assert!(matches!(err, LlmError::Rejected { status: 400, .. }));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_brain_does_not_retry_auth_failure() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_error(LlmError::AuthFailed {
            provider: "openai".into(),
        });
        let brain = test_brain(model.clone());

        let err = brain.complete(CompletionRequest::text("q")).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brain_times_out_slow_calls() {
        let brain = Brain::new(
            Arc::new(SlowModel),
            Duration::from_secs(2),
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        let err = brain.complete(CompletionRequest::text("q")).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout { timeout_secs: 2 }));
    }

    #[tokio::test]
    async fn test_brain_parses_structured_text() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_response(MockLanguageModel::text_response(
            "```json\n{\"relevant\": true}\n```",
        ));
        let brain = test_brain(model);
        let schema = OutputSchema::new("grade", json!({"type": "object"}));

        let response = brain
            .complete(CompletionRequest::structured("q", schema))
            .await
            .unwrap();
        assert_eq!(response.structured, Some(json!({"relevant": true})));
    }

    #[tokio::test]
    async fn test_brain_rejects_unparseable_structured_output() {
        let model = Arc::new(MockLanguageModel::new());
        model.queue_response(MockLanguageModel::text_response("yes, it is relevant"));
        let brain = test_brain(model);
        let schema = OutputSchema::new("grade", json!({"type": "object"}));

        let err = brain
            .complete(CompletionRequest::structured("q", schema))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { ref schema, .. } if schema == "grade"));
    }

    #[test]
    fn test_parse_structured_variants() {
        assert_eq!(parse_structured("[\"a\", \"b\"]"), Some(json!(["a", "b"])));
        assert_eq!(
            parse_structured("Here you go: {\"grounded\": false} hope it helps"),
            Some(json!({"grounded": false}))
        );
        assert_eq!(
            parse_structured("keywords: [\"scope 3\", \"emissions\"]"),
            Some(json!(["scope 3", "emissions"]))
        );
        assert_eq!(parse_structured("no json here"), None);
    }
}
