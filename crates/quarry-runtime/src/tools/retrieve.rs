use std::collections::HashSet;

use tracing::{debug, info};

use super::fuzzy::close_matches;
use crate::retrieval::Retriever;

const SUGGESTIONS: usize = 5;
const SUGGESTION_CUTOFF: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrieveOutcome {
    /// Full text added to the transcript
    Added(String),
    /// Already in context this session; nothing added
    AlreadyInContext,
    /// Unknown id; the fragment carries suggestions
    NotFound(String),
}

impl RetrieveOutcome {
    pub fn fragment(&self) -> &str {
        match self {
            RetrieveOutcome::Added(f) | RetrieveOutcome::NotFound(f) => f,
            RetrieveOutcome::AlreadyInContext => "",
        }
    }
}

/// Look a document up by exact id and add it to `context` on a hit.
pub async fn retrieve(retriever: &Retriever, path: &str, context: &mut HashSet<String>) -> RetrieveOutcome {
    if context.contains(path) {
        debug!(doc_id = path, "Already in context, skipping");
        return RetrieveOutcome::AlreadyInContext;
    }

    if let Some(mut content) = retriever.lookup(path).await {
        if let Some(link) = retriever.linker().chat_link(path) {
            content.push_str(&format!("\n\nSource URL: {}", link));
        }
        context.insert(path.to_string());
        info!(doc_id = path, chars = content.len(), "Retrieved document");
        return RetrieveOutcome::Added(format!(
            "\n\nRetrieved file: {}\nFile content:\n{}",
            path, content
        ));
    }

    let ids = retriever.all_ids().await;
    let suggestions = close_matches(path, &ids, SUGGESTIONS, SUGGESTION_CUTOFF);
    info!(doc_id = path, suggestions = suggestions.len(), "Document not in index");

    let mut fragment = String::new();
    if !suggestions.is_empty() {
        fragment.push_str(&format!("\n\nDid you mean: {}", suggestions.join(", ")));
    }
    fragment.push_str(&format!(
        "\n\nRetrieved file: {}\nFile content:\n[File not found in index. Searched: {}]",
        path, path
    ));
    RetrieveOutcome::NotFound(fragment)
}
