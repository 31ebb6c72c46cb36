use serde::{Deserialize, Serialize};

/// Which blend slot an embedding space fills when two spaces are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceKind {
    #[default]
    General,
    Code,
}

/// One similarity hit as reported by a single embedding space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub id: String,
    pub text: String,
    pub score: f64,
}

impl RawHit {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }
}

/// All hits one embedding space returned for a query, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpaceHits {
    pub space: String,
    pub kind: SpaceKind,
    pub hits: Vec<RawHit>,
}

impl SpaceHits {
    pub fn new(space: impl Into<String>, kind: SpaceKind, hits: Vec<RawHit>) -> Self {
        Self {
            space: space.into(),
            kind,
            hits,
        }
    }
}

/// Coarse content class derived from a document id's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Code,
    Mixed,
    Docs,
}

impl FileType {
    /// `(general, code)` blend ratio for dual-space scoring
    pub fn blend_ratio(self) -> (f64, f64) {
        match self {
            FileType::Code => (0.6, 0.4),
            FileType::Mixed => (0.5, 0.5),
            FileType::Docs => (0.8, 0.2),
        }
    }
}

/// A ranked, re-weighted search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    /// Blended score when two spaces were merged, otherwise the raw similarity
    pub raw_score: f64,
    pub extension_weight: f64,
    pub path_weight: f64,
    /// Clamped model weight actually used in the product
    pub model_weight: f64,
    pub file_type: Option<FileType>,
    pub general_score: Option<f64>,
    pub code_score: Option<f64>,
    pub adjusted_score: f64,
}

impl SearchResult {
    /// Result reported as-is, without any re-weighting
    pub fn unweighted(hit: RawHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            raw_score: hit.score,
            extension_weight: 1.0,
            path_weight: 1.0,
            model_weight: 1.0,
            file_type: None,
            general_score: None,
            code_score: None,
            adjusted_score: hit.score,
        }
    }
}

/// Statistics returned after an indexing operation.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_embedded: usize,
    pub errors: usize,
}
