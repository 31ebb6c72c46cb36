pub mod document_store;
pub mod embedding;
pub mod index;
pub mod indexer;
pub mod links;
pub mod scoring;
pub mod types;
pub mod vector_store;

use std::sync::Arc;

use tracing::{info, warn};

use crate::retrieval::index::RetrievalIndex;
use crate::retrieval::links::SourceLinker;
use crate::retrieval::scoring::{ScoreCombiner, ScoringConfig, CANDIDATE_FACTOR};
use crate::retrieval::types::SearchResult;
use crate::weights::WeightStore;

pub use index::{EmbeddingSpace, MemoryIndex, SqliteIndex, UnavailableIndex};
pub use types::{FileType, RawHit, SpaceHits, SpaceKind};

/// Ranked search over the index with learned weights applied.
///
/// Every method is infallible: backend errors are logged and reported as
/// "no results".
pub struct Retriever {
    index: Arc<dyn RetrievalIndex>,
    weights: Arc<WeightStore>,
    combiner: ScoreCombiner,
    linker: SourceLinker,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn RetrievalIndex>,
        weights: Arc<WeightStore>,
        scoring: &ScoringConfig,
        linker: SourceLinker,
    ) -> Self {
        Self {
            index,
            weights,
            combiner: ScoreCombiner::new(scoring),
            linker,
        }
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    pub fn linker(&self) -> &SourceLinker {
        &self.linker
    }

    pub fn is_available(&self) -> bool {
        self.index.is_available()
    }

    /// Top `limit` results after re-weighting a `limit * 50` candidate pool
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        if limit == 0 {
            return Vec::new();
        }
        let spaces = match self.index.search(query, limit.saturating_mul(CANDIDATE_FACTOR)).await {
            Ok(spaces) => spaces,
            Err(e) => {
                warn!(query, error = %e, "Search failed");
                return Vec::new();
            }
        };
        let results = self.combiner.rank(&spaces, &self.weights, limit);
        info!(query, limit, found = results.len(), "Search complete");
        results
    }

    /// Verbatim SQL over the corpus view. Rows are reported without re-weighting.
    pub async fn select(&self, sql: &str) -> Vec<SearchResult> {
        match self.index.select(sql).await {
            Ok(hits) => hits.into_iter().map(SearchResult::unweighted).collect(),
            Err(e) => {
                warn!(sql, error = %e, "SQL search failed");
                Vec::new()
            }
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<String> {
        match self.index.lookup_exact(id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(doc_id = id, error = %e, "Lookup failed");
                None
            }
        }
    }

    pub async fn all_ids(&self) -> Arc<Vec<String>> {
        match self.index.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Listing document ids failed");
                Arc::new(Vec::new())
            }
        }
    }

    /// Context block for the first prompt of a session, plus the ids it includes.
    ///
    /// Each entry is headed by its source URL when resolvable, otherwise by its
    /// id. Entries are added whole until `max_chars` would be exceeded.
    pub async fn initial_context(&self, query: &str, limit: usize, max_chars: usize) -> (String, Vec<String>) {
        let results = self.search(query, limit).await;
        let docs: Vec<(String, String)> = results.into_iter().map(|r| (r.id, r.text)).collect();
        self.format_context(&docs, max_chars)
    }

    pub fn format_context(&self, docs: &[(String, String)], max_chars: usize) -> (String, Vec<String>) {
        let mut block = String::new();
        let mut ids = Vec::new();
        for (id, text) in docs {
            let header = match self.linker.url_for(id) {
                Some(url) => format!("Source: {}\n", url),
                None => format!("Document: {}\n", id),
            };
            let entry = format!("{}{}\n\n", header, text);
            if block.len() + entry.len() > max_chars {
                break;
            }
            block.push_str(&entry);
            ids.push(id.clone());
        }

        if ids.is_empty() {
            return (NO_CONTEXT.to_string(), ids);
        }
        (block.trim_end().to_string(), ids)
    }
}

pub const NO_CONTEXT: &str = "No relevant information found.";
