use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::llm::{Message, Usage};

/// Mutable state of one session. Owned by a single run, never shared.
#[derive(Debug, Default)]
pub struct SessionState {
    pub thread_id: Option<String>,
    pub query: String,
    /// Model invocations so far, across resumptions
    pub turns_used: usize,
    /// Documents whose full text is already in the transcript
    pub context_ids: HashSet<String>,
    /// Successful RETRIEVEs, in order
    pub retrieved: Vec<String>,
    /// Ids to merge into the thread cache when the session ends
    pub touched: Vec<String>,
    pub transcript: Vec<Message>,
    /// Every response block, in order
    pub responses: Vec<String>,
    pub usage: Usage,
}

impl SessionState {
    pub fn new(query: &str, thread_id: Option<String>) -> Self {
        Self {
            query: query.to_string(),
            thread_id,
            ..Default::default()
        }
    }

    pub fn touch(&mut self, id: &str) {
        if !self.touched.iter().any(|t| t == id) {
            self.touched.push(id.to_string());
        }
    }

    pub fn suspend(&self) -> SuspendedSession {
        let mut context_ids: Vec<String> = self.context_ids.iter().cloned().collect();
        context_ids.sort();
        SuspendedSession {
            thread_id: self.thread_id.clone(),
            query: self.query.clone(),
            turns_used: self.turns_used,
            context_ids,
            transcript: self.transcript.clone(),
        }
    }
}

/// Snapshot of a finished session that may be continued for more turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedSession {
    pub thread_id: Option<String>,
    pub query: String,
    pub turns_used: usize,
    pub context_ids: Vec<String>,
    pub transcript: Vec<Message>,
}

impl SuspendedSession {
    pub fn into_state(self) -> SessionState {
        SessionState {
            thread_id: self.thread_id,
            query: self.query,
            turns_used: self.turns_used,
            context_ids: self.context_ids.into_iter().collect(),
            transcript: self.transcript,
            ..Default::default()
        }
    }
}
