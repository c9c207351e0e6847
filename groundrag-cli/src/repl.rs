//! Interactive multi-turn chat.
//!
//! Keeps the conversation history on the client side and sends it with each
//! question, so follow-ups are rewritten into standalone queries.

use groundrag_core::config::RagConfig;
use groundrag_core::{
    ConversationHistory, ConversationTurn, PipelineError, PipelineOrchestrator, PipelineResult,
    Query,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// What a line of input asks the loop to do.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Question(&'a str),
    Quit,
    Clear,
    History,
    Help,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" | "/q" => Input::Quit,
        "/clear" => Input::Clear,
        "/history" => Input::History,
        "/help" | "/?" => Input::Help,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        question => Input::Question(question),
    }
}

pub async fn run_chat(orchestrator: Arc<PipelineOrchestrator>, config: &RagConfig) -> anyhow::Result<()> {
    println!("groundrag chat | model: {}", config.llm.model);
    println!("Type /help for commands, /quit to exit\n");

    let mut history = ConversationHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Clear => {
                history = ConversationHistory::new();
                println!("History cleared.");
            }
            Input::History => {
                for turn in history.turns() {
                    println!("{:?}: {}", turn.role, turn.text);
                }
            }
            Input::Help => {
                println!("/clear    forget the conversation so far");
                println!("/history  show the conversation so far");
                println!("/quit     exit");
                println!("Ctrl-C cancels a question in progress.");
            }
            Input::Unknown(cmd) => println!("Unknown command: {cmd}"),
            Input::Question(question) => {
                let query = Query::new(question).with_history(history.clone());
                match ask_interruptible(&orchestrator, query).await {
                    Ok(result) => {
                        let reply = result.outcome.message().to_string();
                        println!("\n{reply}");
                        if let Some(answer) = result.outcome.answer() {
                            println!("  [sources: {}]", answer.sources().join(", "));
                        }
                        println!();
                        history.push(ConversationTurn::user(question));
                        history.push(ConversationTurn::assistant(reply));
                    }
                    Err(PipelineError::Cancelled) => println!("\nCancelled.\n"),
                    Err(e) => eprintln!("\nError: {e}\n"),
                }
            }
        }
    }
    Ok(())
}

/// Answer `query`, cancelling it if Ctrl-C arrives first.
async fn ask_interruptible(
    orchestrator: &PipelineOrchestrator,
    query: Query,
) -> Result<PipelineResult, PipelineError> {
    let cancel = CancellationToken::new();
    let answer = orchestrator.answer_with_cancellation(query, cancel.clone());
    tokio::pin!(answer);

    tokio::select! {
        result = &mut answer => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            answer.await
        }
    }
}
