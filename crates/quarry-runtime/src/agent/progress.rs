use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// Intermediate activity note ("searching for ...")
    Status,
    /// User-visible answer text
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub kind: ProgressKind,
    pub text: String,
    /// Set on exactly one update per session: the terminal answer
    pub is_final: bool,
    /// The session stopped because it ran out of turns
    pub hit_turn_limit: bool,
}

impl ProgressUpdate {
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Status,
            text: text.into(),
            is_final: false,
            hit_turn_limit: false,
        }
    }

    pub fn response(text: impl Into<String>, is_final: bool, hit_turn_limit: bool) -> Self {
        Self {
            kind: ProgressKind::Response,
            text: text.into(),
            is_final,
            hit_turn_limit,
        }
    }
}

/// Receives progress from a running session.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, update: ProgressUpdate);
}

/// Bounded channel to a transport; waits for capacity rather than dropping.
#[async_trait]
impl ProgressSink for mpsc::Sender<ProgressUpdate> {
    async fn emit(&self, update: ProgressUpdate) {
        if self.send(update).await.is_err() {
            debug!("Progress receiver dropped");
        }
    }
}

/// Keeps every update in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn responses(&self) -> Vec<ProgressUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.kind == ProgressKind::Response)
            .collect()
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn emit(&self, update: ProgressUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}

/// Discards everything.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _update: ProgressUpdate) {}
}
