use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const WEIGHTS_TABLE: TableDefinition<&str, f64> = TableDefinition::new("model_weights");
const THREADS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("thread_cache");

/// Flat key-value state shared by the weight store and the thread cache.
pub struct Storage {
    db: Database,
}

impl Storage {
    /// Open or create redb database
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("Failed to open state database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WEIGHTS_TABLE)?;
            let _ = write_txn.open_table(THREADS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Persist one document weight. Committed before returning.
    pub fn save_weight(&self, doc_id: &str, value: f64) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WEIGHTS_TABLE)?;
            table.insert(doc_id, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Persist the full weight table in one transaction.
    pub fn save_weights(&self, weights: &HashMap<String, f64>) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WEIGHTS_TABLE)?;
            for (id, value) in weights {
                table.insert(id.as_str(), *value)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_weights(&self) -> Result<HashMap<String, f64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WEIGHTS_TABLE)?;
        let mut weights = HashMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            weights.insert(key.value().to_string(), value.value());
        }
        Ok(weights)
    }

    /// Upsert one thread cache entry as JSON.
    pub fn save_thread<T: Serialize>(&self, thread_id: &str, entry: &T) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(THREADS_TABLE)?;
            table.insert(thread_id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove_threads(&self, thread_ids: &[String]) -> Result<()> {
        if thread_ids.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(THREADS_TABLE)?;
            for id in thread_ids {
                table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load all thread entries. Rows that fail to decode are skipped.
    pub fn load_threads<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(THREADS_TABLE)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match serde_json::from_str::<T>(value.value()) {
                Ok(parsed) => entries.push((key.value().to_string(), parsed)),
                Err(e) => warn!(thread_id = key.value(), error = %e, "Skipping corrupt thread entry"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        ids: Vec<String>,
    }

    #[test]
    fn test_weights_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        {
            let storage = Storage::open(&path).unwrap();
            storage.save_weight("a/b.py", 1.5).unwrap();
            storage.save_weight("a/c.md", 5.0).unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        let weights = storage.load_weights().unwrap();
        assert_eq!(weights.get("a/b.py"), Some(&1.5));
        assert_eq!(weights.get("a/c.md"), Some(&5.0));
    }

    #[test]
    fn test_thread_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("state.redb")).unwrap();
        storage
            .save_thread("t1", &Entry { ids: vec!["x".into()] })
            .unwrap();
        storage.save_thread("t2", &Entry { ids: vec![] }).unwrap();
        storage.remove_threads(&["t2".to_string()]).unwrap();

        let threads: Vec<(String, Entry)> = storage.load_threads().unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].0, "t1");
        assert_eq!(threads[0].1.ids, vec!["x".to_string()]);
    }
}
