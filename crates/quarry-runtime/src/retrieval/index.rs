use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::document_store::DocumentStore;
use super::embedding::EmbeddingProvider;
use super::types::{RawHit, SpaceHits, SpaceKind};
use super::vector_store::VectorStore;

/// Read access to an indexed corpus.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Top `k` hits per embedding space
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SpaceHits>>;

    /// Full text of a document, `None` when the id is not indexed
    async fn lookup_exact(&self, id: &str) -> Result<Option<String>>;

    /// Every indexed document id, sorted. Implementations cache this.
    async fn list_ids(&self) -> Result<Arc<Vec<String>>>;

    /// Verbatim read-only query over the `corpus(id, text)` view
    async fn select(&self, sql: &str) -> Result<Vec<RawHit>>;

    fn is_available(&self) -> bool {
        true
    }
}

/// One named embedding space and the provider that fills it.
#[derive(Clone)]
pub struct EmbeddingSpace {
    pub name: String,
    pub kind: SpaceKind,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingSpace {
    pub fn new(name: impl Into<String>, kind: SpaceKind, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            name: name.into(),
            kind,
            embedder,
        }
    }
}

/// SQLite-backed index with one or more embedding spaces.
pub struct SqliteIndex {
    documents: Arc<DocumentStore>,
    vectors: Arc<VectorStore>,
    spaces: Vec<EmbeddingSpace>,
    ids: RwLock<Option<Arc<Vec<String>>>>,
}

impl SqliteIndex {
    pub fn open(db_path: &Path, spaces: Vec<EmbeddingSpace>) -> Result<Self> {
        Ok(Self {
            documents: Arc::new(DocumentStore::new(db_path)?),
            vectors: Arc::new(VectorStore::new(db_path)?),
            spaces,
            ids: RwLock::new(None),
        })
    }

    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    pub fn vectors(&self) -> &Arc<VectorStore> {
        &self.vectors
    }

    pub fn spaces(&self) -> &[EmbeddingSpace] {
        &self.spaces
    }

    /// Drop the cached id list after the corpus changes
    pub fn invalidate_ids(&self) {
        if let Ok(mut ids) = self.ids.write() {
            *ids = None;
        }
    }
}

#[async_trait]
impl RetrievalIndex for SqliteIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SpaceHits>> {
        let mut out = Vec::with_capacity(self.spaces.len());
        for space in &self.spaces {
            let query_emb = space.embedder.embed(query).await?;
            let scored = self.vectors.search(&space.name, &query_emb, k)?;

            let mut hits = Vec::with_capacity(scored.len());
            for (doc_id, chunk, score) in scored {
                if let Some(text) = self.documents.get_chunk(&doc_id, chunk)? {
                    hits.push(RawHit::new(doc_id, text, score as f64));
                }
            }
            debug!(space = %space.name, hits = hits.len(), "Space search complete");
            out.push(SpaceHits::new(space.name.clone(), space.kind, hits));
        }
        Ok(out)
    }

    async fn lookup_exact(&self, id: &str) -> Result<Option<String>> {
        self.documents.get_document(id)
    }

    async fn list_ids(&self) -> Result<Arc<Vec<String>>> {
        if let Some(ids) = self
            .ids
            .read()
            .map_err(|e| anyhow!("Id cache poisoned: {}", e))?
            .as_ref()
        {
            return Ok(ids.clone());
        }
        let fresh = Arc::new(self.documents.list_document_ids()?);
        *self
            .ids
            .write()
            .map_err(|e| anyhow!("Id cache poisoned: {}", e))? = Some(fresh.clone());
        Ok(fresh)
    }

    async fn select(&self, sql: &str) -> Result<Vec<RawHit>> {
        self.documents.select(sql)
    }
}

/// Stand-in used when the real index could not be opened at start.
pub struct UnavailableIndex;

#[async_trait]
impl RetrievalIndex for UnavailableIndex {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<SpaceHits>> {
        Ok(Vec::new())
    }

    async fn lookup_exact(&self, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list_ids(&self) -> Result<Arc<Vec<String>>> {
        Ok(Arc::new(Vec::new()))
    }

    async fn select(&self, _sql: &str) -> Result<Vec<RawHit>> {
        Ok(Vec::new())
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Small in-process corpus scored by query word overlap.
///
/// Single `general` space. Useful for tests and demos where no embedding
/// provider is configured.
pub struct MemoryIndex {
    docs: BTreeMap<String, String>,
    ids: Arc<Vec<String>>,
}

impl MemoryIndex {
    pub fn new<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let docs: BTreeMap<String, String> = docs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let ids = Arc::new(docs.keys().cloned().collect());
        Self { docs, ids }
    }

    fn score(query_words: &[String], id: &str, text: &str) -> f64 {
        if query_words.is_empty() {
            return 0.0;
        }
        let haystack = format!("{} {}", id, text).to_lowercase();
        let matched = query_words
            .iter()
            .filter(|w| haystack.contains(w.as_str()))
            .count();
        matched as f64 / query_words.len() as f64
    }
}

#[async_trait]
impl RetrievalIndex for MemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SpaceHits>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        let mut hits: Vec<RawHit> = self
            .docs
            .iter()
            .map(|(id, text)| RawHit::new(id.clone(), text.clone(), Self::score(&words, id, text)))
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(vec![SpaceHits::new("general", SpaceKind::General, hits)])
    }

    async fn lookup_exact(&self, id: &str) -> Result<Option<String>> {
        Ok(self.docs.get(id).cloned())
    }

    async fn list_ids(&self) -> Result<Arc<Vec<String>>> {
        Ok(self.ids.clone())
    }

    async fn select(&self, sql: &str) -> Result<Vec<RawHit>> {
        Err(anyhow!("SQL queries are not supported by the in-memory index: {}", sql))
    }
}
