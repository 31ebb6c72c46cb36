//! Closest-name suggestions for ids that are not in the index.

/// Normalized edit similarity in `[0, 1]`; `1.0` means identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Up to `n` candidates with similarity at least `cutoff`, best first.
/// Equal scores keep candidate order.
pub fn close_matches<'a>(word: &str, candidates: &'a [String], n: usize, cutoff: f64) -> Vec<&'a str> {
    let word_len = word.chars().count();
    let mut scored: Vec<(f64, &'a str)> = candidates
        .iter()
        .filter(|c| {
            // Length alone already bounds the best achievable similarity
            let len = c.chars().count();
            let longest = len.max(word_len).max(1);
            1.0 - len.abs_diff(word_len) as f64 / longest as f64 >= cutoff
        })
        .map(|c| (similarity(word, c), c.as_str()))
        .filter(|(score, _)| *score >= cutoff)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(n).map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_close_matches_ranked_and_cut() {
        let ids: Vec<String> = ["src/model.py", "src/models.py", "docs/index.md", "src/modle.py"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let matches = close_matches("src/model.py", &ids, 5, 0.6);
        assert_eq!(matches[0], "src/model.py");
        assert!(matches.contains(&"src/models.py"));
        assert!(matches.contains(&"src/modle.py"));
        assert!(!matches.contains(&"docs/index.md"));

        assert_eq!(close_matches("src/model.py", &ids, 1, 0.6).len(), 1);
    }
}
