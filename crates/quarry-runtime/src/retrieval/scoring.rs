//! Re-ranking of raw similarity hits.
//!
//! `adjusted = extension * path * clamp(model, 0.5, 2.0) * blended`, sorted
//! descending with ties kept in input order, truncated to the caller's limit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{FileType, RawHit, SearchResult, SpaceHits, SpaceKind};
use crate::weights::{clamp_model_weight, WeightStore};

/// Candidate pool size per requested result
pub const CANDIDATE_FACTOR: usize = 50;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "rs", "js", "jsx", "ts", "tsx", "go", "java", "kt", "swift", "c", "cc", "cpp", "h",
    "hpp", "cs", "rb", "php", "scala", "lua", "r", "jl", "m", "f90", "sh", "bash", "zsh", "sql",
];

const MIXED_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "xml", "html", "ipynb", "cfg", "ini", "conf", "tex",
];

/// Static multipliers, read once at start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Extension (with or without the leading dot) -> multiplier
    #[serde(default)]
    pub extensions: BTreeMap<String, f64>,
    /// Case-insensitive id substring -> multiplier
    #[serde(default)]
    pub path_includes: BTreeMap<String, f64>,
}

fn extension_of(id: &str) -> Option<String> {
    Path::new(id)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify a document by the extension of its id.
pub fn classify(id: &str) -> FileType {
    match extension_of(id) {
        Some(ext) if CODE_EXTENSIONS.contains(&ext.as_str()) => FileType::Code,
        Some(ext) if MIXED_EXTENSIONS.contains(&ext.as_str()) => FileType::Mixed,
        _ => FileType::Docs,
    }
}

pub struct ScoreCombiner {
    extensions: HashMap<String, f64>,
    path_includes: Vec<(String, f64)>,
}

impl ScoreCombiner {
    pub fn new(config: &ScoringConfig) -> Self {
        let extensions = config
            .extensions
            .iter()
            .map(|(ext, w)| (ext.trim_start_matches('.').to_ascii_lowercase(), *w))
            .collect();
        let path_includes = config
            .path_includes
            .iter()
            .map(|(kw, w)| (kw.to_lowercase(), *w))
            .collect();
        Self {
            extensions,
            path_includes,
        }
    }

    pub fn extension_weight(&self, id: &str) -> f64 {
        extension_of(id)
            .and_then(|ext| self.extensions.get(&ext).copied())
            .unwrap_or(1.0)
    }

    /// Product of every path keyword multiplier whose keyword occurs in `id`
    pub fn path_weight(&self, id: &str) -> f64 {
        let lower = id.to_lowercase();
        self.path_includes
            .iter()
            .filter(|(kw, _)| lower.contains(kw.as_str()))
            .map(|(_, w)| *w)
            .product()
    }

    /// Merge per-space hits, re-weight and return the top `limit`.
    pub fn rank(&self, spaces: &[SpaceHits], weights: &WeightStore, limit: usize) -> Vec<SearchResult> {
        let dual = spaces.iter().any(|s| s.kind == SpaceKind::General)
            && spaces.iter().any(|s| s.kind == SpaceKind::Code);

        let mut results: Vec<SearchResult> = merge(spaces)
            .into_iter()
            .map(|merged| {
                let (raw_score, file_type, general_score, code_score) = if dual {
                    let file_type = classify(&merged.id);
                    let (gw, cw) = file_type.blend_ratio();
                    let g = merged.general.unwrap_or(0.0);
                    let c = merged.code.unwrap_or(0.0);
                    (g * gw + c * cw, Some(file_type), Some(g), Some(c))
                } else {
                    let best = merged
                        .general
                        .into_iter()
                        .chain(merged.code)
                        .fold(f64::NEG_INFINITY, f64::max);
                    (if best.is_finite() { best } else { 0.0 }, None, None, None)
                };

                let extension_weight = self.extension_weight(&merged.id);
                let path_weight = self.path_weight(&merged.id);
                let model_weight = clamp_model_weight(weights.get(&merged.id));
                let adjusted_score = extension_weight * path_weight * model_weight * raw_score;

                SearchResult {
                    id: merged.id,
                    text: merged.text,
                    raw_score,
                    extension_weight,
                    path_weight,
                    model_weight,
                    file_type,
                    general_score,
                    code_score,
                    adjusted_score,
                }
            })
            .collect();

        // Vec::sort_by is stable, equal scores keep first-seen order
        results.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(limit);
        results
    }
}

struct Merged {
    id: String,
    text: String,
    general: Option<f64>,
    code: Option<f64>,
}

/// Union of ids across spaces in first-seen order. Within one slot the best
/// score wins; text comes from the first hit seen.
fn merge(spaces: &[SpaceHits]) -> Vec<Merged> {
    let mut order: Vec<Merged> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for space in spaces {
        for RawHit { id, text, score } in &space.hits {
            let pos = *index.entry(id.clone()).or_insert_with(|| {
                order.push(Merged {
                    id: id.clone(),
                    text: text.clone(),
                    general: None,
                    code: None,
                });
                order.len() - 1
            });
            let slot = match space.kind {
                SpaceKind::General => &mut order[pos].general,
                SpaceKind::Code => &mut order[pos].code,
            };
            *slot = Some(slot.map_or(*score, |s| s.max(*score)));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general(hits: &[(&str, f64)]) -> SpaceHits {
        SpaceHits::new(
            "general",
            SpaceKind::General,
            hits.iter().map(|(id, s)| RawHit::new(*id, "text", *s)).collect(),
        )
    }

    fn code(hits: &[(&str, f64)]) -> SpaceHits {
        SpaceHits::new(
            "code",
            SpaceKind::Code,
            hits.iter().map(|(id, s)| RawHit::new(*id, "text", *s)).collect(),
        )
    }

    fn config(ext: &[(&str, f64)], paths: &[(&str, f64)]) -> ScoringConfig {
        ScoringConfig {
            extensions: ext.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            path_includes: paths.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("a/b/main.py"), FileType::Code);
        assert_eq!(classify("a/b/Cargo.TOML"), FileType::Mixed);
        assert_eq!(classify("a/b/notebook.ipynb"), FileType::Mixed);
        assert_eq!(classify("a/b/README.md"), FileType::Docs);
        assert_eq!(classify("a/b/LICENSE"), FileType::Docs);
    }

    #[test]
    fn test_single_space_uses_raw_score() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        let results = combiner.rank(&[general(&[("a.md", 0.4), ("b.md", 0.9)])], &weights, 5);
        assert_eq!(results[0].id, "b.md");
        assert_eq!(results[0].raw_score, 0.9);
        assert_eq!(results[0].adjusted_score, 0.9);
        assert!(results[0].file_type.is_none());
    }

    #[test]
    fn test_dual_space_blend_by_file_type() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        let results = combiner.rank(
            &[
                general(&[("x/lib.py", 1.0), ("x/guide.md", 1.0), ("x/conf.yaml", 1.0)]),
                code(&[("x/lib.py", 0.5), ("x/guide.md", 0.5), ("x/conf.yaml", 0.5)]),
            ],
            &weights,
            10,
        );
        let score = |id: &str| results.iter().find(|r| r.id == id).unwrap().raw_score;
        assert!((score("x/lib.py") - 0.8).abs() < 1e-9);
        assert!((score("x/guide.md") - 0.9).abs() < 1e-9);
        assert!((score("x/conf.yaml") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_missing_space_counts_as_zero() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        let results = combiner.rank(
            &[general(&[("only_general.md", 1.0)]), code(&[("only_code.rs", 1.0)])],
            &weights,
            10,
        );
        let md = results.iter().find(|r| r.id == "only_general.md").unwrap();
        assert_eq!(md.code_score, Some(0.0));
        assert!((md.raw_score - 0.8).abs() < 1e-9);
        let rs = results.iter().find(|r| r.id == "only_code.rs").unwrap();
        assert!((rs.raw_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_extension_and_path_multipliers() {
        let combiner = ScoreCombiner::new(&config(
            &[(".md", 2.0), ("PY", 0.5)],
            &[("tests", 0.5), ("docs", 3.0)],
        ));
        assert_eq!(combiner.extension_weight("a/readme.MD"), 2.0);
        assert_eq!(combiner.extension_weight("a/main.py"), 0.5);
        assert_eq!(combiner.extension_weight("a/main.rs"), 1.0);
        assert_eq!(combiner.path_weight("Docs/Tests/x.py"), 1.5);
        assert_eq!(combiner.path_weight("src/x.py"), 1.0);
    }

    #[test]
    fn test_truncates_after_sorting() {
        let combiner = ScoreCombiner::new(&config(&[("md", 10.0)], &[]));
        let weights = WeightStore::in_memory();
        // Lowest raw score, but boosted past the others by its extension
        let results = combiner.rank(
            &[general(&[("a.py", 0.9), ("b.py", 0.8), ("c.md", 0.1)])],
            &weights,
            1,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c.md");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        let results = combiner.rank(
            &[general(&[("first.md", 0.5), ("second.md", 0.5), ("third.md", 0.5)])],
            &weights,
            3,
        );
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first.md", "second.md", "third.md"]);
    }

    #[test]
    fn test_monotonic_in_raw_score() {
        let combiner = ScoreCombiner::new(&config(&[("py", 1.3)], &[("src", 0.7)]));
        let weights = WeightStore::in_memory();
        weights.set("src/a.py", 1.7).unwrap();
        let mut previous = f64::NEG_INFINITY;
        for raw in [0.0, 0.1, 0.25, 0.5, 0.75, 1.0] {
            let r = combiner.rank(&[general(&[("src/a.py", raw)])], &weights, 1);
            assert!(r[0].adjusted_score >= previous);
            previous = r[0].adjusted_score;
        }
    }

    #[test]
    fn test_strictly_increasing_in_model_weight() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        let mut previous = f64::NEG_INFINITY;
        for w in [0.5, 0.8, 1.0, 1.2, 1.9, 2.0] {
            weights.set("a.md", w).unwrap();
            let r = combiner.rank(&[general(&[("a.md", 0.6)])], &weights, 1);
            assert!(r[0].adjusted_score > previous, "weight {w}");
            previous = r[0].adjusted_score;
        }
    }

    #[test]
    fn test_stored_weight_clamped_only_in_scoring() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        let weights = WeightStore::in_memory();
        weights.set("hi.md", 5.0).unwrap();
        weights.set("lo.md", -1.0).unwrap();
        let results = combiner.rank(&[general(&[("hi.md", 1.0), ("lo.md", 1.0)])], &weights, 2);
        assert_eq!(results[0].model_weight, 2.0);
        assert_eq!(results[1].model_weight, 0.5);
        assert_eq!(weights.get("hi.md"), 5.0);
        assert_eq!(weights.get("lo.md"), -1.0);
    }

    #[test]
    fn test_empty_input() {
        let combiner = ScoreCombiner::new(&ScoringConfig::default());
        assert!(combiner.rank(&[], &WeightStore::in_memory(), 5).is_empty());
    }
}
