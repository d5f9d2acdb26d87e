//! Minder CLI: type a command, review the cards, approve what should stick.
//!
//! This is a thin interactive driver over the intent pipeline. It runs
//! against the in-memory store; with the `llm` feature and
//! `MINDER_LLM_API_KEY` set, interpretation goes through the configured
//! completion endpoint, otherwise a canned demo interpretation is used so
//! the confirmation workflow can be exercised offline.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use minder_intent::{
    CardState, CommandOutcome, CommandSession, ConfirmationBatch, Interpreter, MockCompletion,
    SessionEvent,
};
use minder_model::{CandidateItem, Item};
use minder_store::{MemoryStore, OptimisticStore};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "minder", version, about = "Confirm-before-commit personal item assistant")]
struct Args {
    /// Owner id for the demo store.
    #[arg(long, default_value = "demo")]
    owner: String,

    /// Treat input as a voice transcript with this recognition confidence.
    #[arg(long)]
    asr_confidence: Option<f32>,

    /// One-shot command; omit for the interactive prompt.
    command: Vec<String>,
}

const DEMO_RESPONSE: &str = r#"{
  "operation": "create",
  "confidence": 0.9,
  "items": [{"kind": "task", "title": "buy groceries", "priority": "important"}],
  "explanation": "Demo interpretation (no completion endpoint configured)."
}"#;

fn completion_client() -> Arc<dyn minder_intent::CompletionClient> {
    #[cfg(feature = "llm")]
    {
        match minder_intent::llm::HttpCompletion::from_env() {
            Ok(client) => return Arc::new(client),
            Err(error) => {
                eprintln!("{} {error}", "no completion endpoint:".yellow());
            }
        }
    }
    eprintln!(
        "{}",
        "using the canned demo interpretation; set MINDER_LLM_API_KEY and build with --features llm for real interpretation"
            .dimmed()
    );
    Arc::new(MockCompletion::always(DEMO_RESPONSE))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let backend = Arc::new(MemoryStore::new());
    let store = OptimisticStore::new(backend, &args.owner);
    let _watcher = store.watch_remote();

    let interpreter = Interpreter::new(completion_client());
    let mut session = CommandSession::new(interpreter, store);
    session.on_event(Box::new(|event| {
        if let SessionEvent::AutoLinked { links } = event {
            println!("{}", format!("linked {links} related item(s)").dimmed());
        }
    }));

    if !args.command.is_empty() {
        let command = args.command.join(" ");
        run_command(&session, &command, args.asr_confidence).await?;
        return Ok(());
    }

    println!("{}", "minder: enter a command, or \"quit\"".bold());
    let stdin = io::stdin();
    loop {
        print!("{} ", ">".cyan());
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "list" => {
                // Converge with the backing store before displaying.
                session.store().reconcile_now().await;
                for item in session.store().items() {
                    println!("  {}", describe(&item));
                }
                continue;
            }
            command => run_command(&session, command, args.asr_confidence).await?,
        }
    }
    Ok(())
}

async fn run_command(
    session: &CommandSession,
    command: &str,
    asr_confidence: Option<f32>,
) -> Result<()> {
    match session.submit(command, asr_confidence).await {
        Ok(CommandOutcome::Confirmation(batch)) => drive_batch(session, batch).await,
        Ok(CommandOutcome::NothingMatched { reference }) => {
            println!("{} \"{reference}\"", "nothing matched".yellow());
            Ok(())
        }
        Ok(CommandOutcome::Matches(items)) => {
            if items.is_empty() {
                println!("{}", "no matches".yellow());
            }
            for item in items {
                println!("  {}", describe(&item));
            }
            Ok(())
        }
        Err(error) => {
            // Blocking failure: the user retries the command.
            println!("{} {error}", "could not interpret:".red());
            Ok(())
        }
    }
}

async fn drive_batch(session: &CommandSession, mut batch: ConfirmationBatch) -> Result<()> {
    let stdin = io::stdin();
    let card_ids: Vec<_> = batch.cards().iter().map(|c| c.id).collect();
    for card_id in card_ids {
        loop {
            let card = batch
                .cards()
                .iter()
                .find(|c| c.id == card_id)
                .expect("card belongs to batch");
            println!("{}", render_card(card));
            print!("  approve / reject / edit title? [a/r/e] ");
            io::stdout().flush()?;
            let mut answer = String::new();
            stdin.lock().read_line(&mut answer)?;
            match answer.trim() {
                "a" | "y" => {
                    match session.approve(&mut batch, card_id).await {
                        Ok(_) => println!("  {}", "approved".green()),
                        // Card stays pending; let the user decide again.
                        Err(error) => {
                            println!("  {} {error}", "commit failed:".red());
                            continue;
                        }
                    }
                    break;
                }
                "e" => {
                    print!("  new title: ");
                    io::stdout().flush()?;
                    let mut title = String::new();
                    stdin.lock().read_line(&mut title)?;
                    let patch = CandidateItem {
                        title: Some(title.trim().to_string()),
                        ..Default::default()
                    };
                    if let Err(error) = batch.edit(card_id, &patch) {
                        println!("  {} {error}", "cannot edit:".red());
                    }
                    continue;
                }
                _ => {
                    session.reject(&mut batch, card_id).ok();
                    println!("  {}", "rejected".yellow());
                    break;
                }
            }
        }
    }

    if batch.is_closed() {
        let summary = session.finalize(batch).await;
        println!(
            "{}",
            format!(
                "batch closed: {} approved, {} rejected",
                summary.approved, summary.rejected
            )
            .dimmed()
        );
    }
    Ok(())
}

fn render_card(card: &minder_intent::ConfirmationCard) -> String {
    let operation = match card.operation {
        minder_intent::Operation::Create => "create".green(),
        minder_intent::Operation::Edit => "edit".blue(),
        minder_intent::Operation::Delete => "delete".red(),
        minder_intent::Operation::Query => "query".normal(),
    };
    let state = match card.state() {
        CardState::Pending => "pending",
        CardState::Approved => "approved",
        CardState::Rejected => "rejected",
    };
    let subject = card
        .target
        .as_ref()
        .map(describe)
        .or_else(|| card.candidate.title.clone())
        .unwrap_or_else(|| "Untitled".to_string());
    format!("[{operation}] {subject} ({state})")
}

fn describe(item: &Item) -> String {
    let mut line = format!("[{}] {}", item.kind().as_str(), item.title);
    if let Some(due) = item.due_at() {
        line.push_str(&format!(" (due {})", due.format("%Y-%m-%d %H:%M")));
    }
    if let Some(starts) = item.starts_at() {
        line.push_str(&format!(" (at {})", starts.format("%Y-%m-%d %H:%M")));
    }
    if !item.linked_items.is_empty() {
        line.push_str(&format!(" [{} linked]", item.linked_items.len()));
    }
    line
}
