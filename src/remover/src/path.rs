//! Locations in the hierarchical namespace.

use std::fmt;

/// A slash-delimited location such as `/users/alice`. `/` is the root.
///
/// Empty segments are dropped when parsing, so `//users/alice/` and
/// `users/alice` name the same node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path of the immediate child named `key`. The key is used as a single
    /// segment verbatim.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl From<&str> for NodePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root() {
        let root = NodePath::parse("/");
        assert!(root.is_root());
        assert_eq!(root, NodePath::root());
        assert_eq!(root.to_string(), "/");
        assert_eq!(root.key(), None);
    }

    #[test]
    fn test_parse_normalises_slashes() {
        let path = NodePath::parse("//users//alice/");
        assert_eq!(path.segments(), ["users", "alice"]);
        assert_eq!(path.to_string(), "/users/alice");
        assert_eq!(path, NodePath::from("users/alice"));
    }

    #[test]
    fn test_child() {
        let path = NodePath::root().child("users").child("alice");
        assert_eq!(path.to_string(), "/users/alice");
        assert_eq!(path.key(), Some("alice"));
    }
}
