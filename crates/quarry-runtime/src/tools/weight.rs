use tracing::{info, warn};

use crate::directives::WeightUpdate;
use crate::weights::WeightStore;

/// Apply every WEIGHT of a turn, in order, and summarize.
///
/// Each update is persisted as it is applied. A failed write is reported in
/// the summary and the remaining updates still run.
pub fn apply_weights(store: &WeightStore, updates: &[WeightUpdate], malformed: &[String]) -> String {
    let mut summary = String::from("\n\nModel reweighting:");

    for WeightUpdate { path, multiplier } in updates {
        match store.set(path, *multiplier) {
            Ok(()) => {
                info!(doc_id = %path, multiplier, "Model weight set");
                summary.push_str(&format!(
                    "\nWeighting file: {} with multiplier: {}",
                    path, multiplier
                ));
            }
            Err(e) => {
                warn!(doc_id = %path, multiplier, error = %e, "Model weight not persisted");
                summary.push_str(&format!(
                    "\nWeighting file: {} with multiplier: {} (applied for now, but not saved: {})",
                    path, multiplier, e
                ));
            }
        }
    }

    for raw in malformed {
        warn!(directive = %raw, "Malformed WEIGHT directive");
        summary.push_str(&format!(
            "\nIgnored malformed WEIGHT: {} (expected: WEIGHT: <path> <multiplier>)",
            raw
        ));
    }

    summary
}
