pub mod agent;
pub mod directives;
pub mod llm;
pub mod retrieval;
pub mod storage;
pub mod thread_cache;
pub mod tools;
pub mod weights;

pub use agent::progress::{CollectingSink, NullSink, ProgressKind, ProgressSink, ProgressUpdate};
pub use agent::prompt::HistoryMessage;
pub use agent::session::SuspendedSession;
pub use agent::worker::{spawn_resume, spawn_session};
pub use agent::{Agent, AgentConfig, AgentOutcome, QueryRequest, TerminationReason};
pub use directives::{parse as parse_directives, Directive, ParsedDirectives, SearchRequest, WeightUpdate};
pub use llm::{
    GeminiClient, GenerateConfig, GenerateResponse, LLMProvider, Message, OpenAIClient, ProviderChain,
    Role, Usage,
};
pub use retrieval::embedding::{EmbeddingProvider, OpenAIEmbedding};
pub use retrieval::index::RetrievalIndex;
pub use retrieval::indexer::DocumentIndexer;
pub use retrieval::links::{RepositoryConfig, SourceLinker};
pub use retrieval::scoring::{ScoreCombiner, ScoringConfig};
pub use retrieval::types::{IndexStats, SearchResult};
pub use retrieval::{
    EmbeddingSpace, FileType, MemoryIndex, RawHit, Retriever, SpaceHits, SpaceKind, SqliteIndex,
    UnavailableIndex,
};
pub use storage::Storage;
pub use thread_cache::{ThreadCacheConfig, ThreadContextCache};
pub use tools::ToolExecutor;
pub use weights::WeightStore;

/// Initialize structured JSON logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
