pub mod ask;
pub mod chat;
pub mod index;
pub mod init;
pub mod serve;
pub mod weights;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use quarry_runtime::retrieval::index::RetrievalIndex;
use quarry_runtime::{
    Agent, EmbeddingProvider, EmbeddingSpace, GeminiClient, LLMProvider, OpenAIClient, OpenAIEmbedding,
    ProviderChain, Retriever, SourceLinker, SqliteIndex, Storage, ThreadContextCache, UnavailableIndex,
    WeightStore,
};

use crate::config::{expand_path, secret_or_env, Config};

/// Build LLM provider from config (supports env vars as fallback)
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let openai_key = secret_or_env(&config.llm.openai_api_key, &["OPENAI_API_KEY"]);
    let gemini_key = secret_or_env(&config.llm.gemini_api_key, &["GOOGLE_API_KEY", "GEMINI_API_KEY"]);

    let openai = |primary: bool| -> Result<Option<Arc<dyn LLMProvider>>> {
        let Some(key) = &openai_key else {
            return Ok(None);
        };
        let mut client = OpenAIClient::new(key)?;
        if primary && !config.llm.model.is_empty() {
            client = client.with_model(&config.llm.model);
        }
        if !config.llm.base_url.is_empty() {
            client = client.with_base_url(&config.llm.base_url);
        }
        let client: Arc<dyn LLMProvider> = Arc::new(client);
        Ok(Some(client))
    };
    let gemini = |primary: bool| -> Result<Option<Arc<dyn LLMProvider>>> {
        let Some(key) = &gemini_key else {
            return Ok(None);
        };
        let mut client = GeminiClient::new(key)?;
        if primary && !config.llm.model.is_empty() {
            client = client.with_model(&config.llm.model);
        }
        let client: Arc<dyn LLMProvider> = Arc::new(client);
        Ok(Some(client))
    };

    // Primary provider first based on config, the other one as fallback
    let ordered = match config.llm.provider.as_str() {
        "gemini" => [gemini(true)?, openai(false)?],
        _ => [openai(true)?, gemini(false)?],
    };
    let mut providers: Vec<Arc<dyn LLMProvider>> = ordered.into_iter().flatten().collect();

    match providers.len() {
        0 => Err(anyhow!(
            "No LLM provider configured. Set OPENAI_API_KEY or GOOGLE_API_KEY environment variable."
        )),
        1 => Ok(providers.remove(0)),
        _ => Ok(Arc::new(ProviderChain::new(providers))),
    }
}

/// Embedding spaces from config; all share one OpenAI-compatible key
pub fn build_spaces(config: &Config) -> Result<Vec<EmbeddingSpace>> {
    let key = secret_or_env(
        &config.retrieval.embedding_api_key,
        &["EMBEDDING_API_KEY", "OPENAI_API_KEY"],
    )
    .ok_or_else(|| anyhow!("No embedding key configured. Set EMBEDDING_API_KEY or OPENAI_API_KEY."))?;

    Ok(config
        .retrieval
        .spaces
        .iter()
        .map(|space| {
            let mut embedder = OpenAIEmbedding::new(&key).with_model(&space.model, space.dimensions);
            if !config.retrieval.embedding_base_url.is_empty() {
                embedder = embedder.with_base_url(&config.retrieval.embedding_base_url);
            }
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(embedder);
            EmbeddingSpace::new(space.name.clone(), space.kind, embedder)
        })
        .collect())
}

/// Open the index for indexing; failure is an error
pub fn open_sqlite_index(config: &Config) -> Result<SqliteIndex> {
    let db_path = expand_path(&config.retrieval.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spaces = build_spaces(config)?;
    SqliteIndex::open(&db_path, spaces).context(format!("Failed to open index at {:?}", db_path))
}

/// Open the index for querying; failure degrades to an empty index
pub fn open_index(config: &Config) -> Arc<dyn RetrievalIndex> {
    match open_sqlite_index(config) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            warn!(error = %e, "Index unavailable, answering without retrieval");
            Arc::new(UnavailableIndex)
        }
    }
}

pub fn open_storage(config: &Config) -> Result<Arc<Storage>> {
    let path = expand_path(&config.storage.state_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(Storage::open(&path)?))
}

/// Wire provider, index, weights and thread cache into an agent
pub fn build_agent(config: &Config) -> Result<Arc<Agent>> {
    let provider = build_provider(config)?;
    let storage = open_storage(config)?;
    let weights = Arc::new(WeightStore::open(storage.clone())?);
    let thread_cache = Arc::new(ThreadContextCache::open(storage, config.thread_cache.clone())?);

    let retriever = Retriever::new(
        open_index(config),
        weights,
        &config.scoring,
        SourceLinker::new(config.retrieval.repositories.clone()),
    );
    info!(
        model = %provider.model_name(),
        available = retriever.is_available(),
        "Agent ready"
    );

    let agent = Agent::new(config.agent.clone(), provider, Arc::new(retriever)).with_thread_cache(thread_cache);
    Ok(Arc::new(agent))
}
