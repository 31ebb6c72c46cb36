//! Tool directives embedded in model replies.
//!
//! Wire format:
//!
//! ```text
//! [RETRIEVE: <doc id>]
//! [WEIGHT: <doc id> <multiplier>]
//! [SEARCH: <query> limit <N>]      or   [SEARCH: select ... from corpus ...]
//! [TREE: <directory>]
//! [BEGIN RESPONSE] ... [END RESPONSE]
//! [DONE]    end of session
//! [AWAIT]   waiting on the user
//! ```
//!
//! Keywords are case-sensitive and may appear anywhere in a line. Text that
//! is not a directive is ignored.

use std::sync::OnceLock;

use regex::Regex;

pub const RETRIEVE: &str = "RETRIEVE:";
pub const WEIGHT: &str = "WEIGHT:";
pub const SEARCH: &str = "SEARCH:";
pub const TREE: &str = "TREE:";
pub const RESPONSE_BEGIN: &str = "[BEGIN RESPONSE]";
pub const RESPONSE_END: &str = "[END RESPONSE]";
pub const END_SESSION_MARKER: &str = "[DONE]";
pub const AWAIT_USER_MARKER: &str = "[AWAIT]";

#[derive(Debug, Clone, PartialEq)]
pub enum SearchRequest {
    /// Embedding search; `limit` is `None` when the directive gave none
    Semantic { query: String, limit: Option<usize> },
    /// Verbatim read-only SQL
    Sql { query: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightUpdate {
    pub path: String,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Retrieve(String),
    Weight(WeightUpdate),
    /// A WEIGHT line that could not be parsed; carries the raw argument text
    MalformedWeight(String),
    Search(SearchRequest),
    Tree(String),
    Response(String),
    EndSession,
    AwaitUser,
}

/// Directives of one reply, grouped by kind in reply order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDirectives {
    pub retrieves: Vec<String>,
    pub weights: Vec<WeightUpdate>,
    pub malformed_weights: Vec<String>,
    pub searches: Vec<SearchRequest>,
    pub trees: Vec<String>,
    pub response: Option<String>,
    pub end_session: bool,
    pub await_user: bool,
}

impl ParsedDirectives {
    /// Any RETRIEVE, WEIGHT, SEARCH or TREE, well-formed or not
    pub fn has_tool_directives(&self) -> bool {
        !self.retrieves.is_empty()
            || !self.weights.is_empty()
            || !self.malformed_weights.is_empty()
            || !self.searches.is_empty()
            || !self.trees.is_empty()
    }

    pub fn has_marker(&self) -> bool {
        self.end_session || self.await_user
    }
}

impl FromIterator<Directive> for ParsedDirectives {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        let mut parsed = ParsedDirectives::default();
        for directive in iter {
            match directive {
                Directive::Retrieve(path) => parsed.retrieves.push(path),
                Directive::Weight(update) => parsed.weights.push(update),
                Directive::MalformedWeight(raw) => parsed.malformed_weights.push(raw),
                Directive::Search(request) => parsed.searches.push(request),
                Directive::Tree(dir) => parsed.trees.push(dir),
                Directive::Response(text) => {
                    parsed.response.get_or_insert(text);
                }
                Directive::EndSession => parsed.end_session = true,
                Directive::AwaitUser => parsed.await_user = true,
            }
        }
        parsed
    }
}

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(RETRIEVE|WEIGHT|SEARCH|TREE):").expect("valid regex"))
}

fn response_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\[BEGIN RESPONSE\](.*?)\[END RESPONSE\]").expect("valid regex")
    })
}

fn search_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^(.*?)\s+limit\s+(\d+)\s*$").expect("valid regex"))
}

/// Tokenize a reply into directives, in reply order.
///
/// Each keyword counts at most once per line. A keyword's argument runs to the
/// next keyword on the same line or the end of the line.
pub fn tokenize(text: &str) -> Vec<Directive> {
    let mut out = Vec::new();

    for line in text.lines() {
        let matches: Vec<(usize, usize, &str)> = keyword_re()
            .captures_iter(line)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let kw = c.get(1)?;
                Some((whole.start(), whole.end(), kw.as_str()))
            })
            .collect();

        let mut seen: Vec<&str> = Vec::new();
        for (i, (_, arg_start, kw)) in matches.iter().enumerate() {
            if seen.contains(kw) {
                continue;
            }
            seen.push(*kw);

            let arg_end = matches.get(i + 1).map(|m| m.0).unwrap_or(line.len());
            let arg = clean_segment(&line[*arg_start..arg_end]);
            let directive = match *kw {
                "RETRIEVE" => parse_retrieve(arg),
                "WEIGHT" => Some(parse_weight(arg)),
                "SEARCH" => parse_search(arg),
                "TREE" => Some(parse_tree(arg)),
                _ => None,
            };
            out.extend(directive);
        }
    }

    if let Some(text) = extract_response(text) {
        out.push(Directive::Response(text));
    }
    if text.contains(END_SESSION_MARKER) {
        out.push(Directive::EndSession);
    }
    if text.contains(AWAIT_USER_MARKER) {
        out.push(Directive::AwaitUser);
    }
    out
}

pub fn parse(text: &str) -> ParsedDirectives {
    tokenize(text).into_iter().collect()
}

/// Text of the first closed response block, trimmed. Empty blocks count as absent.
pub fn extract_response(text: &str) -> Option<String> {
    let captured = response_re().captures(text)?.get(1)?.as_str().trim();
    if captured.is_empty() {
        None
    } else {
        Some(captured.to_string())
    }
}

/// Trim whitespace, an opening `[` left over from a following directive, and
/// the closing `]` of this one.
fn clean_segment(segment: &str) -> &str {
    let s = segment.trim();
    let s = s.strip_suffix('[').unwrap_or(s).trim_end();
    s.strip_suffix(']').unwrap_or(s).trim_end()
}

fn parse_retrieve(arg: &str) -> Option<Directive> {
    let path = arg.split_whitespace().next()?.trim_end_matches(']');
    if path.is_empty() {
        return None;
    }
    Some(Directive::Retrieve(path.to_string()))
}

fn parse_weight(arg: &str) -> Directive {
    let mut tokens = arg.split_whitespace();
    let path = tokens
        .next()
        .map(|t| t.trim_end_matches([']', ',']))
        .filter(|p| !p.is_empty());
    let multiplier = tokens
        .next()
        .and_then(|t| t.trim_end_matches(']').parse::<f64>().ok())
        .filter(|m| m.is_finite());

    match (path, multiplier) {
        (Some(path), Some(multiplier)) => Directive::Weight(WeightUpdate {
            path: path.to_string(),
            multiplier,
        }),
        _ => Directive::MalformedWeight(arg.to_string()),
    }
}

fn parse_search(arg: &str) -> Option<Directive> {
    let query = arg.trim_end_matches(']').trim();
    if query.is_empty() {
        return None;
    }
    if query.to_lowercase().starts_with("select") {
        return Some(Directive::Search(SearchRequest::Sql {
            query: query.to_string(),
        }));
    }

    let request = match search_limit_re().captures(query) {
        Some(caps) => {
            let text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let limit = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
            SearchRequest::Semantic {
                query: text.to_string(),
                limit,
            }
        }
        None => SearchRequest::Semantic {
            query: query.to_string(),
            limit: None,
        },
    };
    Some(Directive::Search(request))
}

fn parse_tree(arg: &str) -> Directive {
    let dir = arg
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(']')
        .trim_end_matches('/');
    Directive::Tree(dir.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semantic(query: &str, limit: Option<usize>) -> SearchRequest {
        SearchRequest::Semantic {
            query: query.to_string(),
            limit,
        }
    }

    #[test]
    fn test_retrieve_lines() {
        let parsed = parse("Let me look.\n[RETRIEVE: a/b.py]\nRETRIEVE: c/d.md extra words\n");
        assert_eq!(parsed.retrieves, vec!["a/b.py", "c/d.md"]);
        assert!(parsed.has_tool_directives());
    }

    #[test]
    fn test_weight_forms() {
        let parsed = parse("[WEIGHT: a/b.py 1.5]\n[WEIGHT: c.md, 0.7]\n[WEIGHT: d.md high]\n[WEIGHT: e.md]\n[WEIGHT: f.md NaN]");
        assert_eq!(
            parsed.weights,
            vec![
                WeightUpdate { path: "a/b.py".into(), multiplier: 1.5 },
                WeightUpdate { path: "c.md".into(), multiplier: 0.7 },
            ]
        );
        assert_eq!(parsed.malformed_weights, vec!["d.md high", "e.md", "f.md NaN"]);
    }

    #[test]
    fn test_search_limit_parsing() {
        let parsed = parse(
            "[SEARCH: photometry pipeline limit 3]\n\
             SEARCH: magnification map limit 12\n\
             SEARCH: lens LIMIT 7\n\
             SEARCH: how to fit a model\n\
             SEARCH: rate limits explained\n",
        );
        assert_eq!(
            parsed.searches,
            vec![
                semantic("photometry pipeline", Some(3)),
                semantic("magnification map", Some(12)),
                semantic("lens", Some(7)),
                semantic("how to fit a model", None),
                semantic("rate limits explained", None),
            ]
        );
    }

    #[test]
    fn test_search_sql_is_verbatim() {
        let parsed = parse("[SEARCH: SELECT id, text FROM corpus WHERE id LIKE '%fit%' limit 5]");
        assert_eq!(
            parsed.searches,
            vec![SearchRequest::Sql {
                query: "SELECT id, text FROM corpus WHERE id LIKE '%fit%' limit 5".into()
            }]
        );
    }

    #[test]
    fn test_tree_normalization() {
        let parsed = parse("[TREE: src/models/]\nTREE: docs\n[TREE: ]");
        assert_eq!(parsed.trees, vec!["src/models", "docs", ""]);
    }

    #[test]
    fn test_several_keywords_on_one_line() {
        let parsed = parse("[SEARCH: foo limit 3] [RETRIEVE: a/b.py] [TREE: a/]");
        assert_eq!(parsed.searches, vec![semantic("foo", Some(3))]);
        assert_eq!(parsed.retrieves, vec!["a/b.py"]);
        assert_eq!(parsed.trees, vec!["a"]);
    }

    #[test]
    fn test_keyword_counts_once_per_line() {
        let parsed = parse("RETRIEVE: a.py RETRIEVE: b.py");
        assert_eq!(parsed.retrieves, vec!["a.py"]);
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        let parsed = parse("retrieve: a.py\nSearch: foo limit 2");
        assert!(!parsed.has_tool_directives());
    }

    #[test]
    fn test_response_block() {
        let text = "thinking\n[BEGIN RESPONSE]\nThe answer is 42.\n\nSecond line.\n[END RESPONSE]\n[BEGIN RESPONSE]later[END RESPONSE]";
        let parsed = parse(text);
        assert_eq!(parsed.response.as_deref(), Some("The answer is 42.\n\nSecond line."));
        assert!(!parsed.has_tool_directives());
    }

    #[test]
    fn test_unclosed_or_empty_response_is_absent() {
        assert!(parse("[BEGIN RESPONSE] no end").response.is_none());
        assert!(parse("RESPONSE: this is my response").response.is_none());
        assert!(parse("[BEGIN RESPONSE]   [END RESPONSE]").response.is_none());
    }

    #[test]
    fn test_markers_are_distinct() {
        let done = parse("[BEGIN RESPONSE]bye[END RESPONSE]\n[DONE]");
        assert!(done.end_session && !done.await_user);
        let wait = parse("Which version do you use? [AWAIT]");
        assert!(wait.await_user && !wait.end_session);
        assert!(wait.has_marker());
    }

    #[test]
    fn test_tokenize_preserves_reply_order() {
        let directives = tokenize("[SEARCH: x limit 1]\n[RETRIEVE: y.md]");
        assert_eq!(
            directives,
            vec![
                Directive::Search(semantic("x", Some(1))),
                Directive::Retrieve("y.md".into()),
            ]
        );
    }

    #[test]
    fn test_plain_text_has_no_directives() {
        let parsed = parse("I think the answer is in the docs.");
        assert_eq!(parsed, ParsedDirectives::default());
    }
}
