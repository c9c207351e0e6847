//! groundrag CLI: ask questions over a private corpus, chat, or serve HTTP.

mod commands;
mod repl;

use clap::Parser;
use groundrag_core::config::{LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// groundrag: grounded answers from your own documents
#[derive(Parser, Debug)]
#[command(name = "groundrag", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus directory (overrides `corpus.dir`)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Answer a single question and exit
    Ask {
        /// The question
        question: String,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive multi-turn chat
    Chat,
    /// Serve the HTTP API
    Serve {
        /// Bind address (overrides `server.host`)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides `server.port`)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Split and index the corpus, then report what was indexed
    Ingest,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

/// Set up tracing: stderr in the configured format plus a daily JSON file.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(
    config: &LoggingConfig,
    verbose: u8,
    quiet: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let directive = match verbose {
        0 if quiet => "error".to_string(),
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let stderr_filter = if verbose == 0 && !quiet {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive))
    } else {
        EnvFilter::new(&directive)
    };

    let stderr_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Console => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let log_dir = config.log_dir.clone().or_else(|| {
        directories::ProjectDirs::from("dev", "groundrag", "groundrag")
            .map(|d| d.data_dir().join("logs"))
    });
    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, "groundrag.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(stderr_filter))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = groundrag_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let _log_guard = init_logging(&config.logging, cli.verbose, cli.quiet);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    // Apply CLI overrides
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(corpus) = &cli.corpus {
        config.corpus.dir = Some(corpus.clone());
    }

    commands::handle_command(cli.command, config, &workspace).await
}
