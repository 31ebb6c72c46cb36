//! Scripted model and fixture knowledge base shared by the agent tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{Agent, AgentConfig};
use crate::llm::{GenerateConfig, GenerateResponse, LLMProvider, Message, Usage};
use crate::retrieval::links::SourceLinker;
use crate::retrieval::scoring::ScoringConfig;
use crate::retrieval::{MemoryIndex, Retriever};
use crate::weights::WeightStore;

pub const MODEL_PY: &str = "def fit(model):\n    return model.optimize()";

/// Replies in order; fails once the script runs out (unless repeating).
pub struct ScriptedLLM {
    replies: Vec<String>,
    repeat: bool,
    calls: AtomicUsize,
    transcripts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLLM {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.into_iter().map(String::from).collect(),
            repeat: false,
            calls: AtomicUsize::new(0),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: vec![reply.to_string()],
            repeat: true,
            calls: AtomicUsize::new(0),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn transcript_lengths(&self) -> Vec<usize> {
        self.transcripts.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Transcript passed to the most recent call
    pub fn last_transcript(&self) -> Vec<Message> {
        self.transcripts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLLM {
    async fn generate(&self, messages: &[Message], _config: &GenerateConfig) -> Result<GenerateResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().unwrap().push(messages.to_vec());
        let text = if self.repeat {
            self.replies.first().cloned()
        } else {
            self.replies.get(n).cloned()
        };
        let text = text.ok_or_else(|| anyhow!("script exhausted after {} calls", n))?;
        Ok(GenerateResponse {
            text,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
            model: "scripted".into(),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn fixture_retriever() -> Arc<Retriever> {
    let index = Arc::new(MemoryIndex::new([
        ("lens/fit/model.py", MODEL_PY),
        ("lens/fit/README.md", "Fitting lens models"),
        ("lens/fit/docs/guide.md", "A guide to the fitting workflow"),
        ("w.md", "W is for weights"),
        ("x.md", "X marks the spot"),
        ("y.md", "Y is for yesterday"),
        ("z.md", "Z is the last letter"),
    ]));
    Arc::new(Retriever::new(
        index,
        Arc::new(WeightStore::in_memory()),
        &ScoringConfig::default(),
        SourceLinker::new(Vec::new()),
    ))
}

pub fn fixture_agent(llm: Arc<ScriptedLLM>, config: AgentConfig) -> Agent {
    Agent::new(config, llm, fixture_retriever())
}
