//! Pipeline orchestrator: the answer state machine.
//!
//! One request runs as an explicit finite-state machine over named stages.
//! The request's `PipelineState` is passed through every transition and
//! owns the budgets: each unsupported answer consumes either a regeneration
//! (same passages, warning template) or a refinement pass (keywords, fresh
//! retrieval). When both budgets are spent the request ends with an
//! insufficient-evidence outcome rather than an ungrounded answer.
//!
//! Cancellation is cooperative: the token is checked before every stage and
//! raced against every in-flight external call.

use crate::brain::Brain;
use crate::config::{PipelineConfig, RagConfig};
use crate::error::PipelineError;
use crate::prompts::REFUSAL_SENTENCE;
use crate::retriever::{Retriever, RetrieverAdapter};
use crate::stages::{
    AnswerGenerator, DocumentGrader, GenerationMode, HallucinationChecker, KeywordExtractor,
    QueryContextualizer,
};
use crate::types::{Answer, ConversationHistory, GradedPassage, Passage, Query, SupportVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Named stages of the answer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Contextualizing,
    Retrieving,
    Grading,
    NoRelevant,
    Generating,
    Checking,
    Unsupported,
    Refining,
    Grounded,
    InsufficientEvidence,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Grounded | Stage::InsufficientEvidence)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Contextualizing => "contextualizing",
            Stage::Retrieving => "retrieving",
            Stage::Grading => "grading",
            Stage::NoRelevant => "no_relevant",
            Stage::Generating => "generating",
            Stage::Checking => "checking",
            Stage::Unsupported => "unsupported",
            Stage::Refining => "refining",
            Stage::Grounded => "grounded",
            Stage::InsufficientEvidence => "insufficient_evidence",
        };
        f.write_str(name)
    }
}

/// Why a request ended without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientReason {
    /// No retrieval pass produced a relevant passage.
    NoRelevantPassages,
    /// Every generated answer was refused or failed the grounding check.
    Unsupported,
    /// Refinement was needed but extraction produced no keywords the last
    /// retrieval query did not already carry.
    NoKeywords,
}

impl std::fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsufficientReason::NoRelevantPassages => write!(f, "no relevant passages found"),
            InsufficientReason::Unsupported => write!(f, "no answer could be grounded in the passages"),
            InsufficientReason::NoKeywords => write!(f, "query refinement produced no new keywords"),
        }
    }
}

/// Terminal result of a request.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// A grounded answer.
    Answered(Answer),
    /// The explicit insufficient-evidence result.
    InsufficientEvidence { reason: InsufficientReason },
}

impl PipelineOutcome {
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            PipelineOutcome::Answered(answer) => Some(answer),
            PipelineOutcome::InsufficientEvidence { .. } => None,
        }
    }

    /// User-facing text: the answer, or the fixed refusal sentence.
    pub fn message(&self) -> &str {
        match self {
            PipelineOutcome::Answered(answer) => &answer.text,
            PipelineOutcome::InsufficientEvidence { .. } => REFUSAL_SENTENCE,
        }
    }
}

/// Per-request call statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Language model calls issued by the stages (transport retries not counted).
    pub llm_calls: usize,
    pub generator_calls: usize,
    pub retrievals: usize,
    pub regenerations: u32,
    pub refinements: u32,
    pub elapsed_ms: u64,
    /// Every stage entered, in order.
    pub trace: Vec<Stage>,
}

impl PipelineStats {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            llm_calls: 0,
            generator_calls: 0,
            retrievals: 0,
            regenerations: 0,
            refinements: 0,
            elapsed_ms: 0,
            trace: vec![Stage::Start],
        }
    }
}

/// Outcome plus statistics.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub outcome: PipelineOutcome,
    pub stats: PipelineStats,
}

/// Mutable record owned by one in-flight request.
#[derive(Debug)]
pub struct PipelineState {
    pub stage: Stage,
    pub raw_query: String,
    pub history: ConversationHistory,
    /// Self-contained rewrite of the raw query.
    pub contextualized: String,
    /// Query used for the next retrieval.
    pub query: String,
    pub passages: Vec<Arc<Passage>>,
    pub relevant: Vec<GradedPassage>,
    pub answer: Option<Answer>,
    pub regenerations: u32,
    pub refinements: u32,
    pub insufficient: Option<InsufficientReason>,
    regenerating: bool,
    pub stats: PipelineStats,
}

impl PipelineState {
    pub fn new(query: Query) -> Self {
        Self {
            stage: Stage::Start,
            contextualized: query.query.clone(),
            query: query.query.clone(),
            raw_query: query.query,
            history: query.history,
            passages: Vec::new(),
            relevant: Vec::new(),
            answer: None,
            regenerations: 0,
            refinements: 0,
            insufficient: None,
            regenerating: false,
            stats: PipelineStats::new(),
        }
    }

    fn enter(&mut self, next: Stage) {
        debug!(from = %self.stage, to = %next, "Transition");
        self.stage = next;
        self.stats.trace.push(next);
    }

    fn give_up(&mut self, reason: InsufficientReason) -> Stage {
        self.insufficient = Some(reason);
        Stage::InsufficientEvidence
    }
}

/// The query followed by the keywords it does not already contain.
pub fn refine_query(base: &str, keywords: &[String]) -> String {
    let lowered = base.to_lowercase();
    let extra: Vec<&str> = keywords
        .iter()
        .map(String::as_str)
        .filter(|kw| !lowered.contains(&kw.to_lowercase()))
        .collect();
    if extra.is_empty() {
        base.to_string()
    } else {
        format!("{} {}", base.trim_end(), extra.join(" "))
    }
}

/// Race `call` against cancellation.
async fn guarded<T, E, F>(cancel: &CancellationToken, call: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<PipelineError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = call => result.map_err(Into::into),
    }
}

/// Sequences the stages for each request.
pub struct PipelineOrchestrator {
    contextualizer: QueryContextualizer,
    retriever: RetrieverAdapter,
    grader: DocumentGrader,
    generator: AnswerGenerator,
    checker: HallucinationChecker,
    keywords: KeywordExtractor,
    config: PipelineConfig,
    top_k: usize,
}

impl PipelineOrchestrator {
    pub fn new(brain: Arc<Brain>, retriever: Arc<dyn Retriever>, config: &RagConfig) -> Self {
        let pipeline = config.pipeline.clone();
        Self {
            contextualizer: QueryContextualizer::new(Arc::clone(&brain), pipeline.history_window),
            retriever: RetrieverAdapter::new(
                retriever,
                pipeline.stage_timeout(),
                config.retry.clone(),
            ),
            grader: DocumentGrader::new(Arc::clone(&brain), pipeline.grading_concurrency),
            generator: AnswerGenerator::new(Arc::clone(&brain)),
            checker: HallucinationChecker::new(Arc::clone(&brain)),
            keywords: KeywordExtractor::new(brain),
            top_k: config.retrieval.top_k,
            config: pipeline,
        }
    }

    /// Upper bound on model calls for one request under this configuration.
    pub fn max_llm_calls(&self) -> usize {
        self.config.max_llm_calls(self.top_k)
    }

    /// Answer a query. Equivalent to `answer_with_cancellation` with a token
    /// that is never cancelled.
    pub async fn answer(&self, query: Query) -> Result<PipelineResult, PipelineError> {
        self.answer_with_cancellation(query, CancellationToken::new())
            .await
    }

    /// Answer a query, stopping early when `cancel` fires.
    ///
    /// Budget exhaustion is an `Ok` insufficient-evidence outcome. Errors are
    /// reserved for unreachable services, cancellation, invalid requests and
    /// internal contract violations.
    pub async fn answer_with_cancellation(
        &self,
        query: Query,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        if query.query.trim().is_empty() {
            return Err(PipelineError::InvalidRequest {
                message: "query must not be empty".to_string(),
            });
        }

        let mut state = PipelineState::new(query);
        let span = info_span!("pipeline", request_id = %state.stats.request_id);
        let started = Instant::now();

        let result = async {
            info!(history_turns = state.history.len(), "Answering query");
            while !state.stage.is_terminal() {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let next = self.step(&mut state, &cancel).await?;
                state.enter(next);
            }
            Ok(())
        }
        .instrument(span)
        .await;

        state.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let request_id = state.stats.request_id;
        if let Err(err) = result {
            warn!(
                %request_id,
                stage = %state.stage,
                error = %err,
                llm_calls = state.stats.llm_calls,
                "Request aborted"
            );
            return Err(err);
        }

        let outcome = match (state.stage, state.answer.take()) {
            (Stage::Grounded, Some(answer)) => PipelineOutcome::Answered(answer),
            (Stage::Grounded, None) => {
                return Err(PipelineError::ContractViolation {
                    stage: Stage::Grounded.to_string(),
                    message: "reached without an answer".to_string(),
                });
            }
            _ => PipelineOutcome::InsufficientEvidence {
                reason: state.insufficient.unwrap_or(InsufficientReason::Unsupported),
            },
        };

        info!(
            %request_id,
            outcome = %state.stage,
            llm_calls = state.stats.llm_calls,
            generator_calls = state.stats.generator_calls,
            regenerations = state.stats.regenerations,
            refinements = state.stats.refinements,
            elapsed_ms = state.stats.elapsed_ms,
            "Request finished"
        );
        Ok(PipelineResult {
            outcome,
            stats: state.stats,
        })
    }

    /// Run the current stage and return the next one.
    async fn step(
        &self,
        state: &mut PipelineState,
        cancel: &CancellationToken,
    ) -> Result<Stage, PipelineError> {
        match state.stage {
            Stage::Start => Ok(Stage::Contextualizing),

            Stage::Contextualizing => {
                let rewritten = guarded(
                    cancel,
                    self.contextualizer
                        .contextualize(&state.raw_query, &state.history),
                )
                .await?;
                if rewritten.model_called {
                    state.stats.llm_calls += 1;
                }
                state.contextualized = rewritten.text.clone();
                state.query = rewritten.text;
                Ok(Stage::Retrieving)
            }

            Stage::Retrieving => {
                state.passages =
                    guarded(cancel, self.retriever.retrieve(&state.query, self.top_k)).await?;
                state.stats.retrievals += 1;
                Ok(Stage::Grading)
            }

            Stage::Grading => {
                let passages = std::mem::take(&mut state.passages);
                let graded = guarded(cancel, self.grader.grade(&state.query, &passages)).await?;
                state.stats.llm_calls += passages.len();
                state.relevant = graded.into_iter().filter(|g| g.is_relevant()).collect();
                state.answer = None;
                state.regenerating = false;
                info!(
                    retrieved = passages.len(),
                    relevant = state.relevant.len(),
                    "Grading complete"
                );
                if state.relevant.is_empty() {
                    Ok(Stage::NoRelevant)
                } else {
                    Ok(Stage::Generating)
                }
            }

            Stage::NoRelevant => {
                if state.refinements < self.config.max_refinements {
                    Ok(Stage::Refining)
                } else {
                    Ok(state.give_up(InsufficientReason::NoRelevantPassages))
                }
            }

            Stage::Generating => {
                let mode = if state.regenerating {
                    GenerationMode::Regeneration
                } else {
                    GenerationMode::Initial
                };
                let answer = guarded(
                    cancel,
                    self.generator
                        .generate(&state.contextualized, &state.relevant, mode),
                )
                .await?;
                state.stats.llm_calls += 1;
                state.stats.generator_calls += 1;
                let refused = answer.verdict == SupportVerdict::Unsupported;
                state.answer = Some(answer);
                if refused {
                    debug!("Generator refused or degraded, skipping check");
                    Ok(Stage::Unsupported)
                } else {
                    Ok(Stage::Checking)
                }
            }

            Stage::Checking => {
                let Some(answer) = state.answer.as_mut() else {
                    return Err(PipelineError::ContractViolation {
                        stage: Stage::Checking.to_string(),
                        message: "no answer to check".to_string(),
                    });
                };
                let verdict = guarded(cancel, self.checker.check(answer)).await?;
                state.stats.llm_calls += 1;
                answer.verdict = verdict;
                if verdict == SupportVerdict::Grounded {
                    Ok(Stage::Grounded)
                } else {
                    Ok(Stage::Unsupported)
                }
            }

            Stage::Unsupported => {
                if state.regenerations < self.config.max_regenerations {
                    state.regenerations += 1;
                    state.stats.regenerations = state.regenerations;
                    state.regenerating = true;
                    info!(attempt = state.regenerations, "Regenerating unsupported answer");
                    Ok(Stage::Generating)
                } else if state.refinements < self.config.max_refinements {
                    Ok(Stage::Refining)
                } else {
                    Ok(state.give_up(InsufficientReason::Unsupported))
                }
            }

            Stage::Refining => {
                let keywords = guarded(cancel, self.keywords.extract(&state.raw_query)).await?;
                state.stats.llm_calls += 1;
                if keywords.is_empty() {
                    return Ok(state.give_up(InsufficientReason::NoKeywords));
                }
                let refined = refine_query(&state.contextualized, &keywords);
                if refined == state.query {
                    info!(query = %state.query, "Keywords add nothing to the query; not retrieving again");
                    return Ok(state.give_up(InsufficientReason::NoKeywords));
                }
                state.refinements += 1;
                state.stats.refinements = state.refinements;
                state.query = refined;
                info!(pass = state.refinements, query = %state.query, "Refining retrieval");
                Ok(Stage::Retrieving)
            }

            Stage::Grounded | Stage::InsufficientEvidence => {
                Err(PipelineError::ContractViolation {
                    stage: state.stage.to_string(),
                    message: "terminal stage has no successor".to_string(),
                })
            }
        }
    }
}
