use serde::{Deserialize, Serialize};
use std::path::Path;

/// A source repository whose files are indexed under `category/name/...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub category: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Maps document ids back to browsable source URLs.
#[derive(Debug, Clone, Default)]
pub struct SourceLinker {
    repositories: Vec<RepositoryConfig>,
}

impl SourceLinker {
    pub fn new(repositories: Vec<RepositoryConfig>) -> Self {
        Self { repositories }
    }

    /// `category/repo/path` → `<url>/blob/<branch>/<path>`
    pub fn url_for(&self, doc_id: &str) -> Option<String> {
        let mut parts = doc_id.splitn(3, '/');
        let category = parts.next()?;
        let name = parts.next()?;
        let file_path = parts.next()?;

        let repo = self
            .repositories
            .iter()
            .find(|r| r.category == category && r.name == name)?;
        let base = repo.url.strip_suffix(".git").unwrap_or(&repo.url);
        Some(format!(
            "{}/blob/{}/{}",
            base.trim_end_matches('/'),
            repo.branch,
            file_path
        ))
    }

    /// Chat-style link `<url|file-name>`
    pub fn chat_link(&self, doc_id: &str) -> Option<String> {
        let url = self.url_for(doc_id)?;
        let name = Path::new(doc_id)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(doc_id);
        Some(format!("<{}|{}>", url, name))
    }
}
