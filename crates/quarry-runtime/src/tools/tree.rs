use std::collections::BTreeSet;

/// One level of the virtual directory tree implied by document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    /// Immediate subdirectory names, sorted, without trailing `/`
    pub dirs: Vec<String>,
    /// Leaf file names directly under the directory, sorted
    pub files: Vec<String>,
}

impl TreeListing {
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

/// List `directory` (no trailing `/`; empty for the root) from the id set.
pub fn list_directory(ids: &[String], directory: &str) -> TreeListing {
    let prefix = if directory.is_empty() {
        String::new()
    } else {
        format!("{}/", directory)
    };

    let mut dirs = BTreeSet::new();
    let mut files = BTreeSet::new();
    for id in ids {
        let Some(rest) = id.strip_prefix(&prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(dir.to_string());
            }
            None if !rest.is_empty() => {
                files.insert(rest.to_string());
            }
            None => {}
        }
    }

    TreeListing {
        dirs: dirs.into_iter().collect(),
        files: files.into_iter().collect(),
    }
}

/// Model-facing rendering of a TREE directive
pub fn render(ids: &[String], directory: &str) -> String {
    let listing = list_directory(ids, directory);
    if listing.is_empty() {
        return format!(
            "\n\nTREE: Directory '{}' not found or empty in index.",
            directory
        );
    }

    let entries: Vec<String> = listing
        .dirs
        .iter()
        .map(|d| format!("[DIR] {}/", d))
        .chain(listing.files.iter().map(|f| format!("      {}", f)))
        .collect();
    format!(
        "\n\nTREE: Listing for '{}':\n{}",
        directory,
        entries.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_level_listing() {
        let listing = list_directory(&ids(&["a/b.py", "a/c/d.py", "a/e.py"]), "a");
        assert_eq!(listing.dirs, vec!["c"]);
        assert_eq!(listing.files, vec!["b.py", "e.py"]);
    }

    #[test]
    fn test_subdirectories_deduplicated_and_sorted() {
        let listing = list_directory(
            &ids(&["r/z/1.py", "r/a/2.py", "r/z/3/4.py", "r/m.md"]),
            "r",
        );
        assert_eq!(listing.dirs, vec!["a", "z"]);
        assert_eq!(listing.files, vec!["m.md"]);
    }

    #[test]
    fn test_root_listing() {
        let listing = list_directory(&ids(&["a/b.py", "top.md"]), "");
        assert_eq!(listing.dirs, vec!["a"]);
        assert_eq!(listing.files, vec!["top.md"]);
    }

    #[test]
    fn test_prefix_must_end_at_separator() {
        let listing = list_directory(&ids(&["ab/c.py"]), "a");
        assert!(listing.is_empty());
    }

    #[test]
    fn test_render() {
        let text = render(&ids(&["a/b.py", "a/c/d.py", "a/e.py"]), "a");
        assert_eq!(
            text,
            "\n\nTREE: Listing for 'a':\n[DIR] c/\n      b.py\n      e.py"
        );
        assert_eq!(
            render(&ids(&["a/b.py"]), "missing"),
            "\n\nTREE: Directory 'missing' not found or empty in index."
        );
    }
}
