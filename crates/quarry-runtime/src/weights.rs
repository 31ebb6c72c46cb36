//! Learned per-document score multipliers.
//!
//! Values are stored exactly as the model wrote them. Clamping to
//! [`MODEL_WEIGHT_MIN`, `MODEL_WEIGHT_MAX`] happens only when scoring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::storage::Storage;

pub const MODEL_WEIGHT_MIN: f64 = 0.5;
pub const MODEL_WEIGHT_MAX: f64 = 2.0;
pub const DEFAULT_MODEL_WEIGHT: f64 = 1.0;

/// Clamp a stored weight into the range used for scoring.
/// Non-finite values fall back to the neutral weight.
pub fn clamp_model_weight(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(MODEL_WEIGHT_MIN, MODEL_WEIGHT_MAX)
    } else {
        DEFAULT_MODEL_WEIGHT
    }
}

/// Persistent `doc_id -> multiplier` map.
///
/// Reads go through an `RwLock` snapshot. `set` holds `write_lock` across the
/// in-memory update and the durable write, so concurrent sessions cannot
/// interleave a stale flush over a newer value.
pub struct WeightStore {
    weights: RwLock<HashMap<String, f64>>,
    storage: Option<Arc<Storage>>,
    write_lock: Mutex<()>,
}

impl WeightStore {
    /// Load weights from storage
    pub fn open(storage: Arc<Storage>) -> Result<Self> {
        let weights = storage.load_weights()?;
        info!(count = weights.len(), "Loaded model weights");
        Ok(Self {
            weights: RwLock::new(weights),
            storage: Some(storage),
            write_lock: Mutex::new(()),
        })
    }

    /// Store without persistence (tests, degraded mode)
    pub fn in_memory() -> Self {
        Self {
            weights: RwLock::new(HashMap::new()),
            storage: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Raw stored weight, `1.0` when the document was never weighted
    pub fn get(&self, doc_id: &str) -> f64 {
        self.weights
            .read()
            .ok()
            .and_then(|w| w.get(doc_id).copied())
            .unwrap_or(DEFAULT_MODEL_WEIGHT)
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.weights
            .read()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Record a weight and persist it immediately.
    ///
    /// The in-memory value is updated even when the durable write fails;
    /// the error is returned so the caller can report it.
    pub fn set(&self, doc_id: &str, value: f64) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("Weight lock poisoned: {}", e))?;

        self.weights
            .write()
            .map_err(|e| anyhow!("Weight map poisoned: {}", e))?
            .insert(doc_id.to_string(), value);
        debug!(doc_id, value, "Model weight updated");

        match &self.storage {
            Some(storage) => storage.save_weight(doc_id, value),
            None => Ok(()),
        }
    }

    /// Write the whole table to storage
    pub fn flush(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("Weight lock poisoned: {}", e))?;
        match &self.storage {
            Some(storage) => storage.save_weights(&self.snapshot()),
            None => Ok(()),
        }
    }

    /// Re-read the table from storage (picks up writes from other processes)
    pub fn reload(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| anyhow!("Weight lock poisoned: {}", e))?;
        let fresh = storage.load_weights()?;
        *self
            .weights
            .write()
            .map_err(|e| anyhow!("Weight map poisoned: {}", e))? = fresh;
        Ok(())
    }
}
