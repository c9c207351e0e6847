//! Property-based tests for the answer pipeline using proptest.

use proptest::prelude::*;

use groundrag_core::brain::{Brain, MockLanguageModel};
use groundrag_core::config::RagConfig;
use groundrag_core::pipeline::{PipelineOrchestrator, PipelineOutcome, refine_query};
use groundrag_core::retriever::StaticRetriever;
use groundrag_core::types::{Passage, PassageMetadata, Query, SupportVerdict};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted behaviour for one run.
#[derive(Debug, Clone)]
struct Scenario {
    corpus_size: usize,
    relevant: Vec<bool>,
    verdicts: Vec<bool>,
    refusals: Vec<bool>,
    keywords: Vec<String>,
    top_k: usize,
    max_regenerations: u32,
    max_refinements: u32,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        0usize..6,
        prop::collection::vec(any::<bool>(), 6),
        prop::collection::vec(any::<bool>(), 8),
        prop::collection::vec(prop::bool::weighted(0.2), 8),
        prop::collection::vec("[a-z]{1,8}", 0..3),
        1usize..5,
        0u32..3,
        0u32..3,
    )
        .prop_map(
            |(corpus_size, relevant, verdicts, refusals, keywords, top_k, regen, refine)| Scenario {
                corpus_size,
                relevant,
                verdicts,
                refusals,
                keywords,
                top_k,
                max_regenerations: regen,
                max_refinements: refine,
            },
        )
}

fn run(scenario: &Scenario) -> (groundrag_core::pipeline::PipelineResult, usize, usize) {
    let relevant = scenario.relevant.clone();
    let verdicts = scenario.verdicts.clone();
    let refusals = scenario.refusals.clone();
    let keywords = scenario.keywords.clone();
    let checks = AtomicUsize::new(0);
    let generations = AtomicUsize::new(0);

    let model = Arc::new(MockLanguageModel::with_handler(move |req| {
        let response = match req.schema.as_ref().map(|s| s.name.as_str()) {
            Some("grade") => {
                let hit = (0..relevant.len())
                    .any(|i| relevant[i] && req.prompt.contains(&format!("id=\"p{i}\"")));
                MockLanguageModel::json_response(json!({"relevant": hit, "rationale": ""}))
            }
            Some("support") => {
                let n = checks.fetch_add(1, Ordering::SeqCst);
                let grounded = verdicts[n % verdicts.len()];
                MockLanguageModel::json_response(json!({"grounded": grounded}))
            }
            Some("keywords") => MockLanguageModel::json_response(json!({"keywords": keywords})),
            _ => {
                let n = generations.fetch_add(1, Ordering::SeqCst);
                if refusals[n % refusals.len()] {
                    MockLanguageModel::text_response(groundrag_core::prompts::REFUSAL_SENTENCE)
                } else {
                    MockLanguageModel::text_response("An answer.")
                }
            }
        };
        Ok(response)
    }));

    let mut config = RagConfig::default();
    config.retry.max_retries = 0;
    config.retrieval.top_k = scenario.top_k;
    config.pipeline.max_regenerations = scenario.max_regenerations;
    config.pipeline.max_refinements = scenario.max_refinements;

    let corpus = (0..scenario.corpus_size)
        .map(|i| Passage::new(format!("p{i}"), format!("passage {i}"), PassageMetadata::default()))
        .collect();
    let brain = Brain::new(model.clone(), config.pipeline.stage_timeout(), config.retry.clone());
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(brain), Arc::new(StaticRetriever::new(corpus)), &config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime
        .block_on(orchestrator.answer(Query::new("what is passage")))
        .unwrap();
    (result, model.call_count(), orchestrator.max_llm_calls())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pipeline_terminates_within_call_bound(s in scenario()) {
        let (result, calls, bound) = run(&s);
        prop_assert_eq!(result.stats.llm_calls, calls);
        prop_assert!(calls <= bound, "{} calls exceeds bound {}", calls, bound);
        prop_assert!(
            result.stats.generator_calls
                <= 1 + (s.max_regenerations + s.max_refinements) as usize
        );
        prop_assert!(result.stats.regenerations <= s.max_regenerations);
        prop_assert!(result.stats.refinements <= s.max_refinements);
        prop_assert!(result.stats.trace.last().is_some_and(|stage| stage.is_terminal()));
    }

    #[test]
    fn answered_outcomes_are_grounded(s in scenario()) {
        let (result, _, _) = run(&s);
        if let PipelineOutcome::Answered(answer) = &result.outcome {
            prop_assert_eq!(answer.verdict, SupportVerdict::Grounded);
            prop_assert!(!answer.grounding.is_empty());
            prop_assert!(answer.grounding.iter().all(|g| g.is_relevant()));
        }
    }

    #[test]
    fn refined_query_contains_base_and_keywords(
        base in "[a-zA-Z ]{1,30}",
        keywords in prop::collection::vec("[a-zA-Z]{1,10}", 0..5),
    ) {
        let refined = refine_query(&base, &keywords);
        prop_assert!(refined.starts_with(base.trim_end()));
        let lowered = refined.to_lowercase();
        for kw in &keywords {
            prop_assert!(lowered.contains(&kw.to_lowercase()));
        }
    }
}
