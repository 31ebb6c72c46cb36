//! Handlers for the directives a model reply can carry.
//!
//! Each handler returns a text fragment that is fed back to the model in the
//! next turn. None of them fail: misses and bad input are reported inline.

pub mod fuzzy;
pub mod retrieve;
pub mod search;
pub mod tree;
pub mod weight;

use std::collections::HashSet;
use std::sync::Arc;

use crate::directives::{SearchRequest, WeightUpdate};
use crate::retrieval::Retriever;

pub use retrieve::RetrieveOutcome;
pub use tree::{list_directory, TreeListing};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;

pub struct ToolExecutor {
    retriever: Arc<Retriever>,
    default_search_limit: usize,
}

impl ToolExecutor {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self {
            retriever,
            default_search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_default_search_limit(mut self, limit: usize) -> Self {
        self.default_search_limit = limit;
        self
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// RETRIEVE: exact-id lookup, no-op when already in `context`
    pub async fn retrieve(&self, path: &str, context: &mut HashSet<String>) -> RetrieveOutcome {
        retrieve::retrieve(&self.retriever, path, context).await
    }

    /// WEIGHT: record multipliers, persisting each
    pub fn weight(&self, updates: &[WeightUpdate], malformed: &[String]) -> String {
        weight::apply_weights(self.retriever.weights(), updates, malformed)
    }

    /// SEARCH: semantic or verbatim SQL
    pub async fn search(&self, request: &SearchRequest) -> String {
        search::search(&self.retriever, request, self.default_search_limit).await
    }

    /// TREE: one directory level from the indexed ids
    pub async fn tree(&self, directory: &str) -> String {
        let ids = self.retriever.all_ids().await;
        tree::render(&ids, directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::parse;
    use crate::retrieval::links::{RepositoryConfig, SourceLinker};
    use crate::retrieval::scoring::ScoringConfig;
    use crate::retrieval::MemoryIndex;
    use crate::weights::WeightStore;

    fn executor() -> ToolExecutor {
        let index = Arc::new(MemoryIndex::new([
            ("astro/lens/src/fit.py", "def fit(model): return model"),
            ("astro/lens/src/plot.py", "def plot(model): pass"),
            ("astro/lens/docs/usage.md", "Usage: fit a lens model, then plot it"),
        ]));
        let retriever = Retriever::new(
            index,
            Arc::new(WeightStore::in_memory()),
            &ScoringConfig::default(),
            SourceLinker::new(vec![RepositoryConfig {
                category: "astro".into(),
                name: "lens".into(),
                url: "https://github.com/astro/lens".into(),
                branch: "main".into(),
            }]),
        );
        ToolExecutor::new(Arc::new(retriever))
    }

    #[tokio::test]
    async fn test_retrieve_hit_adds_to_context_once() {
        let tools = executor();
        let mut context = HashSet::new();

        let first = tools.retrieve("astro/lens/src/fit.py", &mut context).await;
        let RetrieveOutcome::Added(fragment) = &first else {
            panic!("expected a hit, got {:?}", first);
        };
        assert!(fragment.contains("Retrieved file: astro/lens/src/fit.py"));
        assert!(fragment.contains("def fit(model)"));
        assert!(fragment.contains("<https://github.com/astro/lens/blob/main/src/fit.py|fit.py>"));
        assert!(context.contains("astro/lens/src/fit.py"));

        let second = tools.retrieve("astro/lens/src/fit.py", &mut context).await;
        assert_eq!(second, RetrieveOutcome::AlreadyInContext);
        assert_eq!(second.fragment(), "");
    }

    #[tokio::test]
    async fn test_retrieve_miss_suggests_close_ids() {
        let tools = executor();
        let mut context = HashSet::new();
        let outcome = tools.retrieve("astro/lens/src/fitt.py", &mut context).await;
        let RetrieveOutcome::NotFound(fragment) = &outcome else {
            panic!("expected a miss, got {:?}", outcome);
        };
        assert!(fragment.contains("Did you mean: astro/lens/src/fit.py"));
        assert!(fragment.contains("[File not found in index. Searched: astro/lens/src/fitt.py]"));
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_weight_then_search_uses_new_multiplier() {
        let tools = executor();
        let parsed = parse("[WEIGHT: astro/lens/src/fit.py 1.5]\n[SEARCH: model limit 3]");

        let summary = tools.weight(&parsed.weights, &parsed.malformed_weights);
        assert!(summary.contains("Weighting file: astro/lens/src/fit.py with multiplier: 1.5"));

        let results = tools.search(&parsed.searches[0]).await;
        let block = results
            .split("\n\nResult ")
            .find(|b| b.contains("File: astro/lens/src/fit.py"))
            .unwrap();
        assert!(block.contains("Model weight: 1.500"));
        // fit.py is boosted past the equally scored files
        assert!(results.find("src/fit.py").unwrap() < results.find("src/plot.py").unwrap());
    }

    #[tokio::test]
    async fn test_weight_reports_malformed_lines() {
        let tools = executor();
        let parsed = parse("[WEIGHT: a.md lots]");
        let summary = tools.weight(&parsed.weights, &parsed.malformed_weights);
        assert!(summary.contains("Ignored malformed WEIGHT: a.md lots"));
    }

    #[tokio::test]
    async fn test_search_format_and_default_limit() {
        let tools = executor().with_default_search_limit(1);
        let out = tools
            .search(&SearchRequest::Semantic {
                query: "lens model".into(),
                limit: None,
            })
            .await;
        assert!(out.starts_with("\n\nSearch results:\nlens model\n"));
        assert!(out.contains("Result 1:"));
        assert!(!out.contains("Result 2:"));
        for field in ["Score: ", "Extension weight: ", "Model weight: ", "Final score: ", "Content length: ", "Content: "] {
            assert!(out.contains(field), "missing {field}");
        }
    }

    #[tokio::test]
    async fn test_search_empty_results() {
        let tools = executor();
        let out = tools
            .search(&SearchRequest::Semantic {
                query: "zebra".into(),
                limit: Some(3),
            })
            .await;
        assert!(out.contains("No results found."));
    }

    #[tokio::test]
    async fn test_tree() {
        let tools = executor();
        let out = tools.tree("astro/lens").await;
        assert_eq!(out, "\n\nTREE: Listing for 'astro/lens':\n[DIR] docs/\n[DIR] src/");
        let out = tools.tree("astro/missing").await;
        assert!(out.contains("not found or empty"));
    }
}
