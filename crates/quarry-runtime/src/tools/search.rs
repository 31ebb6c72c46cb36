use std::fmt::Write;

use crate::directives::SearchRequest;
use crate::retrieval::scoring::classify;
use crate::retrieval::types::SearchResult;
use crate::retrieval::Retriever;

/// Upper bound on a model-requested `limit <N>`
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Run one SEARCH directive and format its results for the model.
pub async fn search(retriever: &Retriever, request: &SearchRequest, default_limit: usize) -> String {
    let (shown_query, results) = match request {
        SearchRequest::Sql { query } => (query.as_str(), retriever.select(query).await),
        SearchRequest::Semantic { query, limit } => (
            query.as_str(),
            retriever
                .search(query, limit.unwrap_or(default_limit).min(MAX_SEARCH_LIMIT))
                .await,
        ),
    };
    format_results(retriever, shown_query, &results)
}

pub fn format_results(retriever: &Retriever, query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("\n\nSearch results:\n{}\n", query);
    if results.is_empty() {
        out.push_str("\n  No results found.");
        return out;
    }

    for (i, result) in results.iter().enumerate() {
        let _ = write!(out, "\n\nResult {}:\n", i + 1);
        match retriever.linker().chat_link(&result.id) {
            Some(link) => {
                let _ = writeln!(out, "  File: {} ({})", result.id, link);
            }
            None => {
                let _ = writeln!(out, "  File: {}", result.id);
            }
        }
        let _ = writeln!(out, "  Score: {:.3}", result.raw_score);
        if let (Some(general), Some(code)) = (result.general_score, result.code_score) {
            let file_type = result.file_type.unwrap_or_else(|| classify(&result.id));
            let _ = writeln!(
                out,
                "  File type: {:?} (general {:.3}, code {:.3})",
                file_type, general, code
            );
        }
        let _ = writeln!(out, "  Extension weight: {:.3}", result.extension_weight);
        let _ = writeln!(out, "  Path weight: {:.3}", result.path_weight);
        let _ = writeln!(out, "  Model weight: {:.3}", result.model_weight);
        let _ = writeln!(out, "  Final score: {:.3}", result.adjusted_score);
        let _ = writeln!(out, "  Content length: {} chars", result.text.chars().count());
        let _ = write!(out, "  Content: {}", result.text);
    }
    out
}
