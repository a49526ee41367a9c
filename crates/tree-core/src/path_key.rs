//! Stable relative path keys.
//!
//! A `PathKey` is the forward-slash path of an entry relative to the scan
//! root. It is derived purely from traversal position, so the same entry gets
//! the same key on every scan and annotations can be joined against any later
//! tree. The root itself is the empty key.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(String);

impl PathKey {
    /// The key of the scan root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize an arbitrary path string into key form.
    ///
    /// Backslashes become forward slashes, empty segments are dropped, and
    /// leading/trailing separators are trimmed.
    pub fn normalize(raw: &str) -> Self {
        let joined = raw
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    /// Key of a child entry named `name` under this key.
    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Parent key, or `None` for the root.
    pub fn parent(&self) -> Option<PathKey> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(pos) => Some(Self(self.0[..pos].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Strict ancestors from the nearest parent up to and including the root.
    pub fn ancestors(&self) -> Vec<PathKey> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(key) = current {
            current = key.parent();
            out.push(key);
        }
        out
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathKey {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

/// Join a root display path and a relative key with exactly one separator.
pub fn full_path(root: &str, rel: &str) -> String {
    let rel = PathKey::normalize(rel);
    if rel.is_root() {
        return root.to_string();
    }
    if root.ends_with('/') || root.ends_with('\\') {
        format!("{}{}", root, rel)
    } else {
        format!("{}/{}", root, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_separators() {
        assert_eq!(PathKey::normalize("/src/lib/").as_str(), "src/lib");
        assert_eq!(PathKey::normalize("src//lib").as_str(), "src/lib");
        assert_eq!(PathKey::normalize("src\\lib\\mod.rs").as_str(), "src/lib/mod.rs");
        assert!(PathKey::normalize("///").is_root());
    }

    #[test]
    fn test_child_of_root_has_no_leading_slash() {
        let root = PathKey::root();
        let src = root.child("src");
        assert_eq!(src.as_str(), "src");
        assert_eq!(src.child("main.rs").as_str(), "src/main.rs");
    }

    #[test]
    fn test_ancestors() {
        let key = PathKey::normalize("a/b/c");
        let ancestors: Vec<String> = key.ancestors().into_iter().map(|k| k.into_string()).collect();
        assert_eq!(ancestors, vec!["a/b", "a", ""]);
        assert!(PathKey::root().ancestors().is_empty());
    }

    #[test]
    fn test_full_path() {
        assert_eq!(full_path("/home/me/proj", ""), "/home/me/proj");
        assert_eq!(full_path("/home/me/proj", "src/a.rs"), "/home/me/proj/src/a.rs");
        assert_eq!(full_path("/home/me/proj/", "/src/"), "/home/me/proj/src");
    }
}
