use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::info;

use quarry_runtime::{spawn_resume, spawn_session, HistoryMessage, QueryRequest, SuspendedSession};

use crate::commands::ask::render;
use crate::commands::build_agent;
use crate::config::Config;

/// Interactive REPL. The whole chat is one thread, so documents found for
/// earlier questions seed the context of later ones.
pub async fn execute(config: &Config) -> Result<()> {
    let agent = build_agent(config)?;
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let thread_id = format!("cli-{}-{}", std::process::id(), started);
    let capacity = config.gateway.channel_capacity;
    info!(thread_id = %thread_id, "Starting chat session");

    println!("Quarry - Type 'exit' to quit, 'continue' to keep working on the last question");
    println!("Thread: {}", thread_id);
    println!("---");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut history: Vec<HistoryMessage> = Vec::new();
    let mut suspended: Option<SuspendedSession> = None;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input == "exit" || input == "quit" {
            break;
        }

        let session = if input == "continue" {
            match suspended.take() {
                Some(s) => spawn_resume(agent.clone(), s, capacity),
                None => {
                    println!("Nothing to continue.");
                    continue;
                }
            }
        } else {
            let request = QueryRequest::new(input)
                .with_thread(thread_id.clone())
                .with_history(history.clone());
            spawn_session(agent.clone(), request, capacity)
        };

        match render(session).await {
            Ok(mut outcome) => {
                if input != "continue" {
                    history.push(HistoryMessage {
                        text: input.to_string(),
                        is_bot: false,
                    });
                }
                history.push(HistoryMessage {
                    text: outcome.answer.clone(),
                    is_bot: true,
                });
                suspended = outcome.resume.take();
                if outcome.hit_turn_limit && suspended.is_some() {
                    println!("(type 'continue' to give it more turns)");
                }
            }
            Err(e) => {
                eprintln!("\nError: {}\n", e);
            }
        }
    }

    Ok(())
}
