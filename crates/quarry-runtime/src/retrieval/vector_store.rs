use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// Chunk embeddings for any number of named spaces, with brute-force
/// cosine similarity search. Embeddings are stored as little-endian f32 BLOBs.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open vector database")?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vectors (
                space TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (space, doc_id, chunk_index)
            );",
        )
        .context("Failed to initialize vector table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or update the embedding of one chunk in one space.
    pub fn upsert(&self, space: &str, doc_id: &str, chunk_index: i64, embedding: &[f32]) -> Result<()> {
        let bytes = embedding_to_bytes(embedding);
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        conn.execute(
            "INSERT INTO vectors (space, doc_id, chunk_index, embedding) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(space, doc_id, chunk_index) DO UPDATE SET embedding = excluded.embedding",
            params![space, doc_id, chunk_index, bytes],
        )
        .context("Failed to upsert vector")?;
        Ok(())
    }

    /// Remove every embedding of a document, in all spaces.
    pub fn remove_document(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        conn.execute("DELETE FROM vectors WHERE doc_id = ?1", params![doc_id])?;
        Ok(())
    }

    /// Cosine similarity search within one space.
    ///
    /// Returns `(doc_id, chunk_index, similarity)` for the best chunk of each
    /// document, sorted descending.
    pub fn search(&self, space: &str, query_embedding: &[f32], limit: usize) -> Result<Vec<(String, i64, f32)>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT doc_id, chunk_index, embedding FROM vectors WHERE space = ?1")?;

        let mut best: HashMap<String, (i64, f32)> = HashMap::new();
        let rows = stmt
            .query_map(params![space], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .filter_map(|r| r.ok());

        for (doc_id, chunk, blob) in rows {
            let emb = match bytes_to_embedding(&blob, query_embedding.len()) {
                Ok(emb) => emb,
                Err(e) => {
                    warn!(doc_id = %doc_id, space, error = %e, "Skipping corrupted embedding");
                    continue;
                }
            };
            let sim = cosine_similarity(query_embedding, &emb);
            match best.get(&doc_id) {
                Some((_, s)) if *s >= sim => {}
                _ => {
                    best.insert(doc_id, (chunk, sim));
                }
            }
        }

        let mut scored: Vec<(String, i64, f32)> = best
            .into_iter()
            .map(|(id, (chunk, sim))| (id, chunk, sim))
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm_a.is_finite() || !norm_b.is_finite() || norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() { sim } else { 0.0 }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    let expected_len = dimensions * 4;
    if bytes.len() != expected_len {
        anyhow::bail!(
            "Dimension mismatch: expected {} bytes ({} dims), got {} bytes",
            expected_len, dimensions, bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
