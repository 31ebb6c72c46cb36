use crate::retrieval::index::SqliteIndex;
use crate::retrieval::types::IndexStats;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters per chunk
pub const CHUNK_CHARS: usize = 2000;

/// Indexes a directory of text files into a [`SqliteIndex`].
///
/// Document ids are paths relative to the root, `/`-separated.
pub struct DocumentIndexer {
    root: PathBuf,
    index: Arc<SqliteIndex>,
    chunk_chars: usize,
}

impl DocumentIndexer {
    pub fn new(root: PathBuf, index: Arc<SqliteIndex>) -> Self {
        Self {
            root,
            index,
            chunk_chars: CHUNK_CHARS,
        }
    }

    pub fn with_chunk_chars(mut self, chars: usize) -> Self {
        self.chunk_chars = chars.max(1);
        self
    }

    /// Index all text files under the root. Skips unchanged files (hash match).
    pub async fn index_all(&self) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let mut seen_ids = HashSet::new();

        let files = collect_text_files(&self.root)?;
        info!(count = files.len(), root = %self.root.display(), "Indexing files");

        for path in &files {
            let doc_id = match safe_rel_path(path, &self.root) {
                Some(r) => r,
                None => {
                    warn!(path = %path.display(), "Skipping path outside root");
                    stats.errors += 1;
                    continue;
                }
            };
            seen_ids.insert(doc_id.clone());

            match self.index_file(&doc_id, path).await {
                Ok(Some(chunks)) => {
                    stats.files_indexed += 1;
                    stats.chunks_embedded += chunks;
                }
                Ok(None) => stats.files_skipped += 1,
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "Failed to index file");
                    stats.errors += 1;
                }
            }
        }

        // Remove stale documents (files deleted since the last run)
        let documents = self.index.documents();
        if let Ok(existing_ids) = documents.list_document_ids() {
            for id in existing_ids {
                if !seen_ids.contains(&id) {
                    let _ = documents.remove_document(&id);
                    let _ = self.index.vectors().remove_document(&id);
                    stats.files_removed += 1;
                    debug!(id = %id, "Removed stale document");
                }
            }
        }

        self.index.invalidate_ids();
        info!(?stats, "Indexing complete");
        Ok(stats)
    }

    /// Index a single file. Returns the number of chunks embedded, or
    /// `None` when the file was skipped.
    async fn index_file(&self, doc_id: &str, path: &Path) -> Result<Option<usize>> {
        // Skip files larger than 10MB to avoid OOM and embedding API limits
        const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
        let metadata = tokio::fs::metadata(path).await.context("Failed to read metadata")?;
        if metadata.len() > MAX_FILE_SIZE {
            warn!(path = %path.display(), size = metadata.len(), "Skipping large file");
            return Ok(None);
        }

        let bytes = tokio::fs::read(path).await.context("Failed to read file")?;

        // Skip binary files (null byte heuristic)
        let check_len = bytes.len().min(8192);
        if bytes[..check_len].contains(&0) {
            return Ok(None);
        }

        let content = String::from_utf8(bytes).context("File is not valid UTF-8")?;
        let hash = compute_hash(&content);

        let documents = self.index.documents();
        if let Ok(Some(existing_hash)) = documents.get_content_hash(doc_id) {
            if existing_hash == hash {
                return Ok(None);
            }
        }

        let chunks = chunk_text(&content, self.chunk_chars);
        documents.replace_document(doc_id, &chunks, &hash)?;
        self.index.vectors().remove_document(doc_id)?;

        for space in self.index.spaces() {
            let embeddings = space
                .embedder
                .embed_batch(&chunks)
                .await
                .with_context(|| format!("Embedding failed in space '{}'", space.name))?;
            for (i, emb) in embeddings.iter().enumerate() {
                self.index.vectors().upsert(&space.name, doc_id, i as i64, emb)?;
            }
        }

        Ok(Some(chunks.len()))
    }
}

/// Split into windows of at most `max_chars` characters, preferring to cut
/// at a line break in the second half of the window.
pub fn chunk_text(content: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            if let Some(nl) = chars[start + max_chars / 2..end].iter().rposition(|c| *c == '\n') {
                end = start + max_chars / 2 + nl + 1;
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Validate and produce a `/`-separated relative path, rejecting traversal.
fn safe_rel_path(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if parts.iter().any(|p| *p == "..") {
        return None;
    }
    Some(parts.join("/"))
}

/// Collect all text files from a directory (non-hidden, common extensions).
fn collect_text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut visited = HashSet::new();
    collect_recursive(dir, &mut files, &mut visited)?;
    files.sort();
    Ok(files)
}

fn collect_recursive(dir: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    // Symlink loop protection
    if let Ok(canonical) = dir.canonicalize() {
        if !visited.insert(canonical) {
            return Ok(());
        }
    }

    let entries = std::fs::read_dir(dir).context(format!("Failed to read dir: {:?}", dir))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') || name == "node_modules" || name == "target" || name == "__pycache__"
        {
            continue;
        }

        if path.is_dir() {
            collect_recursive(&path, out, visited)?;
        } else if is_text_path(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_text_path(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    matches!(
        ext,
        "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "json" | "toml" | "yaml" | "yml"
            | "md" | "rst" | "txt" | "html" | "css" | "sql" | "sh" | "bash" | "tex"
            | "go" | "java" | "kt" | "swift" | "c" | "cpp" | "h" | "hpp" | "rb" | "r"
            | "lua" | "conf" | "cfg" | "ini" | "xml" | "csv" | "ipynb"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedding::{EmbeddingProvider, MockEmbedding};
    use crate::retrieval::index::{EmbeddingSpace, RetrievalIndex};
    use crate::retrieval::types::SpaceKind;

    #[test]
    fn test_chunk_text_prefers_line_breaks() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = chunk_text(text, 8);
        assert_eq!(chunks.join(""), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 8));
        assert_eq!(chunks[0], "aaaa\n");
    }

    #[test]
    fn test_chunk_text_multibyte() {
        let text = "é".repeat(5);
        let chunks = chunk_text(&text, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_safe_rel_path() {
        let root = Path::new("/data/corpus");
        assert_eq!(
            safe_rel_path(Path::new("/data/corpus/a/b.py"), root).as_deref(),
            Some("a/b.py")
        );
        assert!(safe_rel_path(Path::new("/elsewhere/b.py"), root).is_none());
    }

    #[tokio::test]
    async fn test_index_all_skips_unchanged_and_removes_stale() {
        let corpus = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(corpus.path().join("pkg")).unwrap();
        std::fs::write(corpus.path().join("pkg/model.py"), "def fit(): pass").unwrap();
        std::fs::write(corpus.path().join("README.md"), "Lens fitting toolkit").unwrap();
        std::fs::write(corpus.path().join("image.bin"), [0u8, 1, 2]).unwrap();

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedding::new(32));
        let index = Arc::new(
            SqliteIndex::open(
                &state.path().join("index.db"),
                vec![
                    EmbeddingSpace::new("general", SpaceKind::General, embedder.clone()),
                    EmbeddingSpace::new("code", SpaceKind::Code, embedder),
                ],
            )
            .unwrap(),
        );
        let indexer = DocumentIndexer::new(corpus.path().to_path_buf(), index.clone());

        let stats = indexer.index_all().await.unwrap();
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(
            *index.list_ids().await.unwrap(),
            vec!["README.md".to_string(), "pkg/model.py".to_string()]
        );

        let stats = indexer.index_all().await.unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert_eq!(stats.files_skipped, 2);

        std::fs::remove_file(corpus.path().join("README.md")).unwrap();
        let stats = indexer.index_all().await.unwrap();
        assert_eq!(stats.files_removed, 1);
        assert_eq!(*index.list_ids().await.unwrap(), vec!["pkg/model.py".to_string()]);

        let spaces = index.search("fit", 5).await.unwrap();
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[1].hits[0].id, "pkg/model.py");
    }
}
