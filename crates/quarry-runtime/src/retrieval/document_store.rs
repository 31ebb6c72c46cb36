use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::types::RawHit;

/// Chunked document text backed by SQLite.
///
/// Also exposes a read-only `corpus(id, text)` view for the SQL form of SEARCH.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    /// Open or create the SQLite database with the document tables.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open document database")?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (doc_id, chunk_index)
            );

            CREATE VIEW IF NOT EXISTS corpus AS
                SELECT doc_id AS id, group_concat(content, char(10) || char(10)) AS text
                FROM (SELECT doc_id, content FROM documents ORDER BY doc_id, chunk_index)
                GROUP BY doc_id;",
        )
        .context("Failed to initialize document tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Replace every chunk of a document in one transaction.
    pub fn replace_document(&self, doc_id: &str, chunks: &[String], content_hash: &str) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])?;
        for (i, chunk) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO documents (doc_id, chunk_index, content, content_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![doc_id, i as i64, chunk, content_hash],
            )
            .context("Failed to index document chunk")?;
        }
        tx.commit().context("Failed to commit document")?;
        Ok(())
    }

    pub fn remove_document(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        conn.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])
            .context("Failed to remove document")?;
        Ok(())
    }

    /// Get the content hash for a document (for cache-based skip).
    pub fn get_content_hash(&self, doc_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT content_hash FROM documents WHERE doc_id = ?1 LIMIT 1")?;
        let result = stmt
            .query_row(params![doc_id], |row| row.get::<_, String>(0))
            .ok();
        Ok(result)
    }

    pub fn get_chunk(&self, doc_id: &str, chunk_index: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt = conn
            .prepare("SELECT content FROM documents WHERE doc_id = ?1 AND chunk_index = ?2")?;
        let result = stmt
            .query_row(params![doc_id, chunk_index], |row| row.get::<_, String>(0))
            .ok();
        Ok(result)
    }

    /// Full document text: all chunks in order, joined by a blank line.
    pub fn get_document(&self, doc_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt = conn
            .prepare("SELECT content FROM documents WHERE doc_id = ?1 ORDER BY chunk_index")?;
        let chunks = stmt
            .query_map(params![doc_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if chunks.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunks.join("\n\n")))
        }
    }

    /// All document ids, sorted.
    pub fn list_document_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt = conn.prepare("SELECT DISTINCT doc_id FROM documents ORDER BY doc_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Run a caller-supplied read-only statement.
    ///
    /// Columns named `id`, `text` and `score` are mapped onto the hit; when
    /// absent, the first and second columns stand in for id and text.
    pub fn select(&self, sql: &str) -> Result<Vec<RawHit>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let mut stmt = conn.prepare(sql).context("Invalid SQL query")?;
        if !stmt.readonly() {
            bail!("Only read-only queries are allowed");
        }

        let names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|n| n.to_ascii_lowercase())
            .collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let id_col = find("id").unwrap_or(0);
        let text_col = find("text").or(if names.len() > 1 { Some(1) } else { None });
        let score_col = find("score");

        let hits = stmt
            .query_map([], |row| {
                let id = value_to_string(row.get_ref(id_col)?);
                let text = match text_col {
                    Some(i) => value_to_string(row.get_ref(i)?),
                    None => String::new(),
                };
                let score = match score_col {
                    Some(i) => match row.get_ref(i)? {
                        ValueRef::Real(f) => f,
                        ValueRef::Integer(n) => n as f64,
                        _ => 0.0,
                    },
                    None => 0.0,
                };
                Ok(RawHit { id, text, score })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect query rows")?;
        Ok(hits)
    }
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
