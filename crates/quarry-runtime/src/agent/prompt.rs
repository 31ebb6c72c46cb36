//! Transcript text sent to the model.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an assistant that answers questions about an indexed knowledge base of source code and documentation.
Your users do not have direct access to the knowledge base.
You will receive search results for the user's query. Prefer them over your own assumptions, and say clearly when you are relying on the results and when you are reasoning on your own.

Tools:
* To see a whole file, write:
    [RETRIEVE: <file_path>]
  If the file is not found you will get a "Did you mean..." list of similar paths. Use it to refine your next request.
* To change how strongly a file is ranked in future searches (multiplier between 0.5 and 2.0):
    [WEIGHT: <file_path> <multiplier>]
  Weight a file by how useful it is in general, not by its relevance to this one question.
* To run a new search:
    [SEARCH: <query> limit <n>]
  <query> is either a keyword phrase (e.g. model fitting parameters limit 5)
  or read-only SQL over the table corpus(id, text), e.g.
  select id, text from corpus where text like '%photometry%' limit 5
* To list a directory of the knowledge base:
    [TREE: <directory>]
* Only text inside a response block is shown to the user:
    [BEGIN RESPONSE]
    <answer>
    [END RESPONSE]
  Everything else you write is internal. Every response block is sent to the user immediately.
  You do not need a response block every turn, but make sure the user gets one before you run out of turns.
* To stop early because you need information from the user, add [AWAIT].
* To stop early because your answer is complete, add [DONE].
Tool order within a turn does not matter: weights are always applied before any search in the same turn."#;

/// A prior chat message supplied by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub text: String,
    #[serde(default)]
    pub is_bot: bool,
}

const STATUS_PHRASES: &[&str] = &[
    "_searching for",
    "_retrieving",
    "_analyzing",
    "_looking through",
    "_checking",
    "_found",
];

/// Progress notes the bot posted into the thread, not real conversation
pub fn is_status_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with(':') && trimmed.contains('_') {
        return true;
    }
    let lower = trimmed.to_lowercase();
    STATUS_PHRASES.iter().any(|p| lower.contains(p))
}

/// The last `limit` real messages as `User:` / `Assistant:` lines.
pub fn format_history(history: &[HistoryMessage], limit: usize) -> Option<String> {
    let kept: Vec<&HistoryMessage> = history
        .iter()
        .filter(|m| !m.text.trim().is_empty() && !is_status_message(&m.text))
        .collect();
    if kept.is_empty() || limit == 0 {
        return None;
    }

    let start = kept.len().saturating_sub(limit);
    let lines: Vec<String> = kept[start..]
        .iter()
        .map(|m| {
            let speaker = if m.is_bot { "Assistant" } else { "User" };
            format!("{}: {}", speaker, m.text.trim())
        })
        .collect();
    Some(lines.join("\n"))
}

/// First transcript entry of a session.
pub fn seed_prompt(system_prompt: &str, max_turns: usize, history: Option<&str>, query: &str, context: &str) -> String {
    let mut prompt = format!(
        "{}\n\nYou will have {} internal turns to answer the user's question.\n\n",
        system_prompt.trim(),
        max_turns
    );
    if let Some(history) = history {
        prompt.push_str(&format!("Recent conversation context:\n{}\n\n", history));
    }
    prompt.push_str(&format!(
        "User query:\n{}\n\nRelevant search results:\n{}\n",
        query, context
    ));
    prompt
}

/// Assistant entry recorded for a turn
pub fn turn_reply(turn: usize, text: &str) -> String {
    format!("\n\nTURN {}:\n\n{}\n", turn, text)
}

/// User-role entry carrying the tool output of a turn
pub fn turn_requests(turn: usize, fragments: &str, remaining: usize) -> String {
    let mut prompt = format!("\n\nTURN {} REQUESTS:\n\n", turn);
    if fragments.trim().is_empty() {
        prompt.push_str(
            "No tool requests were found in your last turn. Use the tools, or answer inside [BEGIN RESPONSE] ... [END RESPONSE].",
        );
    } else {
        prompt.push_str(fragments.trim_start_matches('\n'));
    }
    prompt.push_str(&format!("\n\nTurns remaining: {}", remaining));
    prompt
}

/// User-role entry that restarts a suspended session
pub fn continuation(max_turns: usize) -> String {
    format!(
        "\n\nThe user asked you to continue working on this question. You have {} more internal turns. Build on what you already found.",
        max_turns
    )
}
