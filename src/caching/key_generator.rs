//! # Cache Key Generation
//!
//! Keys are derived from the route prefix and the full original request path,
//! query string included, with every `/` replaced by `:`:
//!
//! ```text
//! build_key("tables", "/tables")              == "tables::tables"
//! build_key("records", "/salary?limit=5")     == "records::salary?limit=5"
//! ```
//!
//! No hashing, truncation or query canonicalisation happens: two requests share
//! a key exactly when their literal paths are equal.

use serde::{Deserialize, Serialize};

const PATH_SEPARATOR: char = '/';
const KEY_DELIMITER: char = ':';

/// Build the cache key for a route prefix and a full request path.
pub fn build_key(prefix: &str, full_path: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + 1 + full_path.len());
    key.push_str(prefix);
    key.push(KEY_DELIMITER);
    key.extend(full_path.chars().map(|c| if c == PATH_SEPARATOR { KEY_DELIMITER } else { c }));
    key
}

/// Deployment-wide key namespace.
///
/// The same namespace qualifies middleware keys and invalidation patterns, so a
/// pattern such as `tables:*` addresses what the `tables` route wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNamespace(Option<String>);

impl KeyNamespace {
    /// An empty string means no namespace
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        let namespace = namespace.into();
        let trimmed = namespace.trim_end_matches(KEY_DELIMITER);
        if trimmed.is_empty() {
            Self(None)
        } else {
            Self(Some(trimmed.to_string()))
        }
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Prefix a key or a key pattern with the namespace
    pub fn qualify(&self, key: &str) -> String {
        match &self.0 {
            Some(ns) => format!("{}{}{}", ns, KEY_DELIMITER, key),
            None => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_example() {
        assert_eq!(build_key("tables", "/tables"), "tables::tables");
    }

    #[test]
    fn test_keys_are_deterministic() {
        let path = "/api/salary?limit=10&offset=20";
        assert_eq!(build_key("records", path), build_key("records", path));
        assert_eq!(build_key("records", path), "records::api:salary?limit=10&offset=20");
    }

    #[test]
    fn test_query_is_part_of_the_key() {
        let first = build_key("records", "/salary?limit=10");
        let second = build_key("records", "/salary?limit=20");
        let bare = build_key("records", "/salary");
        assert_ne!(first, second);
        assert_ne!(first, bare);
    }

    #[test]
    fn test_query_order_is_not_canonicalised() {
        assert_ne!(
            build_key("records", "/salary?limit=1&offset=2"),
            build_key("records", "/salary?offset=2&limit=1")
        );
    }

    #[test]
    fn test_prefix_separates_routes() {
        assert_ne!(build_key("tables", "/x"), build_key("records", "/x"));
    }

    #[test]
    fn test_long_paths_are_kept_verbatim() {
        let path = format!("/{}", "segment/".repeat(200));
        let key = build_key("records", &path);
        assert_eq!(key.len(), "records:".len() + path.len());
        assert!(!key.contains('/'));
    }

    #[test]
    fn test_namespace() {
        let ns = KeyNamespace::new("tabu");
        assert_eq!(ns.qualify("tables::tables"), "tabu:tables::tables");
        assert_eq!(ns.qualify("user:*"), "tabu:user:*");
        assert_eq!(KeyNamespace::new("tabu:"), ns);

        assert_eq!(KeyNamespace::new("").qualify("tables::tables"), "tables::tables");
        assert_eq!(KeyNamespace::none().as_str(), None);
    }
}
