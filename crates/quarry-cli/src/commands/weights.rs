use anyhow::{bail, Result};

use quarry_runtime::weights::clamp_model_weight;
use quarry_runtime::WeightStore;

use crate::commands::open_storage;
use crate::config::Config;

pub fn list(config: &Config) -> Result<()> {
    let store = WeightStore::open(open_storage(config)?)?;
    let mut weights: Vec<(String, f64)> = store.snapshot().into_iter().collect();
    weights.sort_by(|a, b| a.0.cmp(&b.0));

    if weights.is_empty() {
        println!("No model weights recorded.");
        return Ok(());
    }
    for (id, value) in weights {
        let used = clamp_model_weight(value);
        if used == value {
            println!("{:<60} {:.3}", id, value);
        } else {
            println!("{:<60} {:.3} (used as {:.3})", id, value, used);
        }
    }
    Ok(())
}

pub fn set(id: &str, value: f64, config: &Config) -> Result<()> {
    if !value.is_finite() {
        bail!("Weight must be a finite number, got {}", value);
    }
    let store = WeightStore::open(open_storage(config)?)?;
    store.set(id, value)?;
    println!("Set {} to {:.3}", id, value);
    Ok(())
}
