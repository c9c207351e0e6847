//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use groundrag_core::config::RagConfig;
use groundrag_core::embeddings::create_embedder;
use groundrag_core::providers::create_provider;
use groundrag_core::{
    Brain, HybridIndex, IngestStats, PipelineOrchestrator, PipelineOutcome, Query, TokenSplitter,
    ingest_directory,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    mut config: RagConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Ask { question, json } => handle_ask(&question, json, &config).await,
        Commands::Chat => {
            let (orchestrator, _) = build_orchestrator(&config).await?;
            crate::repl::run_chat(orchestrator, &config).await
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            handle_serve(&config).await
        }
        Commands::Ingest => handle_ingest(&config).await,
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

/// Split and index the configured corpus.
pub async fn build_index(config: &RagConfig) -> anyhow::Result<(HybridIndex, IngestStats)> {
    let corpus_dir = config.corpus.dir.as_deref().ok_or_else(|| {
        anyhow::anyhow!("No corpus directory configured. Pass --corpus or set corpus.dir.")
    })?;

    let embedder = create_embedder(&config.embedding);
    let index = HybridIndex::new(embedder, &config.retrieval)?;
    let splitter = TokenSplitter::new(&config.splitter)?;
    let stats = ingest_directory(corpus_dir, &config.corpus.extensions, &splitter, &index).await?;
    if stats.passages == 0 {
        tracing::warn!(
            corpus = %corpus_dir.display(),
            "Corpus produced no passages; every question will get insufficient evidence"
        );
    }
    Ok((index, stats))
}

/// Build the language model, index the corpus and assemble the pipeline.
pub async fn build_orchestrator(
    config: &RagConfig,
) -> anyhow::Result<(Arc<PipelineOrchestrator>, IngestStats)> {
    let model = create_provider(&config.llm)?;
    let brain = Brain::new(
        model,
        config.pipeline.stage_timeout(),
        config.retry.clone(),
    )
    .with_generation_defaults(&config.llm);

    let (index, stats) = build_index(config).await?;
    let orchestrator = PipelineOrchestrator::new(Arc::new(brain), Arc::new(index), config);
    info!(
        model = %config.llm.model,
        passages = stats.passages,
        max_llm_calls = orchestrator.max_llm_calls(),
        "Pipeline ready"
    );
    Ok((Arc::new(orchestrator), stats))
}

async fn handle_ask(question: &str, as_json: bool, config: &RagConfig) -> anyhow::Result<()> {
    let (orchestrator, _) = build_orchestrator(config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = orchestrator
        .answer_with_cancellation(Query::new(question), cancel)
        .await?;

    if as_json {
        let body = match &result.outcome {
            PipelineOutcome::Answered(answer) => json!({
                "status": "answered",
                "answer": answer.text,
                "sources": answer.sources(),
                "stats": result.stats,
            }),
            PipelineOutcome::InsufficientEvidence { reason } => json!({
                "status": "insufficient_evidence",
                "message": result.outcome.message(),
                "reason": reason,
                "stats": result.stats,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{}", result.outcome.message());
    if let Some(answer) = result.outcome.answer() {
        println!("\nSources: {}", answer.sources().join(", "));
    }
    Ok(())
}

async fn handle_serve(config: &RagConfig) -> anyhow::Result<()> {
    let (orchestrator, _) = build_orchestrator(config).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            on_signal.cancel();
        }
    });

    groundrag_core::server::serve(orchestrator, &config.server, shutdown).await?;
    Ok(())
}

async fn handle_ingest(config: &RagConfig) -> anyhow::Result<()> {
    let (index, stats) = build_index(config).await?;
    println!(
        "Indexed {} passages ({} tokens) from {} files in {} ms; {} files skipped.",
        stats.passages, stats.tokens, stats.files_indexed, stats.elapsed_ms, stats.files_skipped
    );
    println!("Index holds {} passages.", index.len());
    Ok(())
}

fn handle_config(action: ConfigAction, config: &RagConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".groundrag");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&RagConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}
