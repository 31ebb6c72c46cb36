//! Shared test helpers: scripted LLM providers, test AppState factory.
#![allow(dead_code)] // helpers used across multiple test crates

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use quarry_runtime::llm::{GenerateConfig, GenerateResponse, LLMProvider, Message, Usage};
use quarry_runtime::retrieval::index::RetrievalIndex;
use quarry_runtime::{
    Agent, AgentConfig, MemoryIndex, Retriever, ScoringConfig, SourceLinker, UnavailableIndex, WeightStore,
};

use quarry_gateway::{create_router, AppState, AuthConfig};

/// Mock LLM provider that always replies with the same text (no network)
pub struct MockLLMProvider {
    reply: String,
    pub calls: AtomicUsize,
}

impl MockLLMProvider {
    /// Answers immediately
    pub fn answering() -> Self {
        Self::replying("[BEGIN RESPONSE]\nmock answer\n[END RESPONSE]")
    }

    /// Never answers, so every session runs out of turns
    pub fn looping() -> Self {
        Self::replying("[TREE: docs]")
    }

    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn generate(&self, _messages: &[Message], _config: &GenerateConfig) -> Result<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerateResponse {
            text: self.reply.clone(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "mock".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

fn memory_index() -> Arc<dyn RetrievalIndex> {
    Arc::new(MemoryIndex::new([
        ("docs/intro.md", "Introduction to the lens fitting toolkit"),
        ("docs/install.md", "Install with pip"),
    ]))
}

pub fn make_agent(provider: MockLLMProvider, index: Arc<dyn RetrievalIndex>) -> Arc<Agent> {
    let retriever = Retriever::new(
        index,
        Arc::new(WeightStore::in_memory()),
        &ScoringConfig::default(),
        SourceLinker::new(Vec::new()),
    );
    let config = AgentConfig {
        max_turns: 2,
        ..Default::default()
    };
    Arc::new(Agent::new(config, Arc::new(provider), Arc::new(retriever)))
}

/// Build a test AppState with no auth requirement and a generous daily limit.
pub fn make_test_state() -> AppState {
    AppState::new(
        make_agent(MockLLMProvider::answering(), memory_index()),
        AuthConfig::new(None),
        1000,
    )
}

/// Build a test AppState whose sessions always hit the turn limit.
pub fn make_looping_state() -> AppState {
    AppState::new(
        make_agent(MockLLMProvider::looping(), memory_index()),
        AuthConfig::new(None),
        1000,
    )
}

/// Build a test AppState whose index could not be opened.
pub fn make_degraded_state() -> AppState {
    AppState::new(
        make_agent(MockLLMProvider::answering(), Arc::new(UnavailableIndex)),
        AuthConfig::new(None),
        1000,
    )
}

/// Build a test AppState with auth enabled using given token.
pub fn make_auth_test_state(token: &str) -> AppState {
    AppState::new(
        make_agent(MockLLMProvider::answering(), memory_index()),
        AuthConfig::new(Some(token.to_string())),
        1000,
    )
}

/// Build a test AppState with a tight daily limit.
pub fn make_ratelimit_test_state(daily_limit: u32) -> AppState {
    AppState::new(
        make_agent(MockLLMProvider::answering(), memory_index()),
        AuthConfig::new(None),
        daily_limit,
    )
}

/// Call the router once, return (status, body as JSON or Null).
pub async fn call(state: &AppState, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
    let app = create_router(state.clone());
    let mut builder = Request::builder().method(method).uri(uri);
    let req = if let Some(json) = body {
        builder = builder.header("content-type", "application/json");
        builder.body(Body::from(json.to_string())).unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    };

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
