//! Deterministic prefix rewriting of destination names during bulk import.
//!
//! One map per object kind; experiment maps are never applied to model
//! names or vice versa.

use std::collections::BTreeMap;

/// A {source_prefix -> destination_prefix} map for one object kind.
#[derive(Debug, Clone, Default)]
pub struct RenameMap {
    prefixes: BTreeMap<String, String>,
}

impl RenameMap {
    pub fn new(prefixes: BTreeMap<String, String>) -> Self {
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Apply the first matching prefix rewrite; names without a matching
    /// prefix pass through unchanged. Empty source prefixes are ignored.
    pub fn apply(&self, name: &str) -> String {
        for (src, dst) in &self.prefixes {
            if src.is_empty() {
                continue;
            }
            if let Some(rest) = name.strip_prefix(src.as_str()) {
                return format!("{dst}{rest}");
            }
        }
        name.to_string()
    }
}

/// Rename maps for the bulk importer, keyed by object kind.
#[derive(Debug, Clone, Default)]
pub struct RenameMaps {
    pub experiments: RenameMap,
    pub models: RenameMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> RenameMap {
        RenameMap::new(
            pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_prefix_rewrite() {
        let m = map(&[("/a/b", "/x/y")]);
        assert_eq!(m.apply("/a/b/c"), "/x/y/c");
    }

    #[test]
    fn test_no_match_passthrough() {
        let m = map(&[]);
        assert_eq!(m.apply("foo"), "foo");
        assert_eq!(m.apply(""), "");
    }

    #[test]
    fn test_empty_key_ignored() {
        let m = map(&[("", "/prefix")]);
        assert_eq!(m.apply("name"), "name");
    }
}
