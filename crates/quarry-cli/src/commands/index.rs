use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use quarry_runtime::DocumentIndexer;

use crate::commands::open_sqlite_index;
use crate::config::Config;

pub async fn execute(dir: PathBuf, config: &Config) -> Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {:?}", dir);
    }
    info!(dir = ?dir, "Indexing");

    let index = Arc::new(open_sqlite_index(config)?);
    let stats = DocumentIndexer::new(dir, index).index_all().await?;

    println!(
        "Indexed {} files ({} unchanged, {} removed), {} chunks embedded, {} errors",
        stats.files_indexed, stats.files_skipped, stats.files_removed, stats.chunks_embedded, stats.errors
    );
    Ok(())
}
