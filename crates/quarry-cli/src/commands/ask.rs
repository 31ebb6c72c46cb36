use anyhow::{Context, Result};
use tracing::info;

use quarry_runtime::agent::worker::SessionHandle;
use quarry_runtime::{spawn_session, AgentOutcome, ProgressKind, QueryRequest};

use crate::commands::build_agent;
use crate::config::Config;

pub async fn execute(query: String, thread: Option<String>, config: &Config) -> Result<()> {
    let agent = build_agent(config)?;

    let mut request = QueryRequest::new(query);
    if let Some(thread) = thread {
        request = request.with_thread(thread);
    }

    let session = spawn_session(agent, request, config.gateway.channel_capacity);
    let outcome = render(session).await?;
    info!(termination = ?outcome.termination, turns = outcome.turns, "Done");
    Ok(())
}

/// Print progress as it arrives: status lines to stderr, responses to stdout
pub async fn render((mut rx, handle): SessionHandle) -> Result<AgentOutcome> {
    while let Some(update) = rx.recv().await {
        match update.kind {
            ProgressKind::Status => eprintln!("  ... {}", update.text),
            ProgressKind::Response => println!("\n{}\n", update.text),
        }
    }
    handle.await.context("Session task failed")
}
