//! Recently used documents per conversation thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadCacheConfig {
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,
    /// Entries older than this are ignored on lookup
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_threads() -> usize {
    50
}
fn default_max_docs() -> usize {
    3
}
fn default_ttl_secs() -> u64 {
    3600
}

impl Default for ThreadCacheConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            max_docs: default_max_docs(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub updated_at: DateTime<Utc>,
    /// Oldest first
    pub doc_ids: Vec<String>,
}

/// Bounded `thread_id -> recent doc ids` map.
///
/// At most `max_threads` entries are kept; a write that goes over evicts the
/// least recently updated threads. Each entry keeps the last `max_docs` ids.
/// Writes are serialized through `write_lock` so storage never sees an older
/// snapshot land after a newer one.
pub struct ThreadContextCache {
    entries: RwLock<HashMap<String, ThreadEntry>>,
    storage: Option<Arc<Storage>>,
    config: ThreadCacheConfig,
    write_lock: Mutex<()>,
}

impl ThreadContextCache {
    pub fn open(storage: Arc<Storage>, config: ThreadCacheConfig) -> Result<Self> {
        let entries: HashMap<String, ThreadEntry> = storage.load_threads()?.into_iter().collect();
        info!(threads = entries.len(), "Loaded thread cache");
        let cache = Self {
            entries: RwLock::new(entries),
            storage: Some(storage),
            config,
            write_lock: Mutex::new(()),
        };
        // Stored state may predate a smaller max_threads
        cache.prune_and_persist(None)?;
        Ok(cache)
    }

    pub fn in_memory(config: ThreadCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            storage: None,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ThreadCacheConfig {
        &self.config
    }

    /// Recent doc ids for a thread, if the entry is non-empty and within the TTL
    pub fn lookup(&self, thread_id: &str) -> Option<Vec<String>> {
        self.lookup_at(thread_id, Utc::now())
    }

    fn lookup_at(&self, thread_id: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(thread_id)?;
        let ttl = i64::try_from(self.config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        if now.signed_duration_since(entry.updated_at) > ttl || entry.doc_ids.is_empty() {
            return None;
        }
        Some(entry.doc_ids.clone())
    }

    pub fn entry(&self, thread_id: &str) -> Option<ThreadEntry> {
        self.entries.read().ok()?.get(thread_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge a session's touched ids into the thread's list and persist.
    ///
    /// Ids already present move to the end. Returns the resulting list. The
    /// in-memory entry is updated even when persisting fails.
    pub fn record(&self, thread_id: &str, touched: &[String]) -> Result<Vec<String>> {
        self.record_at(thread_id, touched, Utc::now())
    }

    fn record_at(&self, thread_id: &str, touched: &[String], now: DateTime<Utc>) -> Result<Vec<String>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("Thread cache lock poisoned: {}", e))?;
        let doc_ids = {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| anyhow!("Thread cache poisoned: {}", e))?;
            let entry = entries
                .entry(thread_id.to_string())
                .or_insert_with(|| ThreadEntry {
                    updated_at: now,
                    doc_ids: Vec::new(),
                });

            for id in touched {
                entry.doc_ids.retain(|existing| existing != id);
                entry.doc_ids.push(id.clone());
            }
            let overflow = entry.doc_ids.len().saturating_sub(self.config.max_docs);
            entry.doc_ids.drain(..overflow);
            entry.updated_at = now;
            entry.doc_ids.clone()
        };
        debug!(thread_id, docs = ?doc_ids, "Thread cache updated");

        self.prune_and_persist(Some(thread_id))?;
        Ok(doc_ids)
    }

    /// Evict the oldest threads beyond `max_threads`, then write the touched
    /// entry and the evictions through to storage.
    fn prune_and_persist(&self, touched: Option<&str>) -> Result<()> {
        let (evicted, saved) = {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| anyhow!("Thread cache poisoned: {}", e))?;

            let mut evicted = Vec::new();
            if entries.len() > self.config.max_threads {
                let mut by_age: Vec<(DateTime<Utc>, String)> = entries
                    .iter()
                    .map(|(id, e)| (e.updated_at, id.clone()))
                    .collect();
                by_age.sort();
                let excess = entries.len() - self.config.max_threads;
                for (_, id) in by_age.into_iter().take(excess) {
                    entries.remove(&id);
                    evicted.push(id);
                }
            }
            let saved = touched.and_then(|id| entries.get(id).map(|e| (id.to_string(), e.clone())));
            (evicted, saved)
        };

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted stale threads");
        }

        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if let Some((id, entry)) = saved {
            storage.save_thread(&id, &entry)?;
        }
        storage.remove_threads(&evicted)
    }
}
