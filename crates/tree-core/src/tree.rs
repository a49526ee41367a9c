//! Directory tree snapshots.
//!
//! `TreeBuilder` walks a root directory once and produces an immutable
//! `TreeNode` hierarchy. Symbolic links are reported with their raw target and
//! never followed. Children are ordered directories first, then by a
//! locale-style name comparison, so an unchanged directory always yields the
//! same snapshot.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use icu_collator::{Collator, CollatorBorrowed};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::path_key::PathKey;

/// Default entries skipped while scanning.
pub const DEFAULT_IGNORE: [&str; 4] = ["node_modules", ".git", ".cursor", ".DS_Store"];

/// One entry of a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Base name of the entry
    pub name: String,
    /// Path relative to the scan root ("" for the root)
    pub rel_path: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Entry type, carrying the fields that only exist for that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir { children: Vec<TreeNode> },
    Symlink { target: String },
}

impl TreeNode {
    /// A directory node without children.
    pub fn empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rel_path: String::new(),
            kind: NodeKind::Dir {
                children: Vec::new(),
            },
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    pub fn children(&self) -> &[TreeNode] {
        match &self.kind {
            NodeKind::Dir { children } => children,
            _ => &[],
        }
    }

    /// Find the node with the given relative path.
    pub fn find(&self, rel_path: &str) -> Option<&TreeNode> {
        let key = PathKey::normalize(rel_path);
        if key.is_root() {
            return Some(self);
        }
        let mut current = self;
        for segment in key.as_str().split('/') {
            current = current.children().iter().find(|c| c.name == segment)?;
        }
        Some(current)
    }

    /// All nodes in pre-order.
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children().iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Canonical serialization used for structural comparison.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Builds tree snapshots for a root directory.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    ignore: BTreeSet<String>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE)
    }
}

impl TreeBuilder {
    pub fn new<I, S>(ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignore: ignore.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ignore_names(&self) -> &BTreeSet<String> {
        &self.ignore
    }

    /// Scan `root` and return its snapshot.
    pub fn build(&self, root: &Path) -> Result<TreeNode, ScanError> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        self.build_node(root, name, PathKey::root())
    }

    fn build_node(&self, path: &Path, name: String, key: PathKey) -> Result<TreeNode, ScanError> {
        let meta = fs::symlink_metadata(path).map_err(|e| ScanError::io(path, e))?;

        if meta.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(|e| ScanError::io(path, e))?;
            return Ok(TreeNode {
                name,
                rel_path: key.into_string(),
                kind: NodeKind::Symlink {
                    target: target.to_string_lossy().into_owned(),
                },
            });
        }

        if !meta.is_dir() {
            return Ok(TreeNode {
                name,
                rel_path: key.into_string(),
                kind: NodeKind::File,
            });
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| ScanError::io(path, e))? {
            let entry = entry.map_err(|e| ScanError::io(path, e))?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            if self.ignore.contains(&entry_name) {
                continue;
            }
            // DirEntry::file_type does not follow links, so a link to a
            // directory sorts with the files.
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir())
                .map_err(|e| ScanError::io(&entry.path(), e))?;
            entries.push((is_dir, entry_name, entry.path()));
        }
        entries.sort_by(|a, b| compare_entries((a.0, &a.1), (b.0, &b.1)));

        let children = entries
            .into_iter()
            .map(|(_, child_name, child_path)| {
                let child_key = key.child(&child_name);
                self.build_node(&child_path, child_name, child_key)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TreeNode {
            name,
            rel_path: key.into_string(),
            kind: NodeKind::Dir { children },
        })
    }
}

/// Directories first, then names in locale order.
fn compare_entries(a: (bool, &str), b: (bool, &str)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| locale_cmp(a.1, b.1))
}

thread_local! {
    static COLLATOR: Option<CollatorBorrowed<'static>> =
        Collator::try_new(Default::default(), Default::default()).ok();
}

/// Name ordering of the root-locale collator.
///
/// Accents and case only matter when names are otherwise equal (`a` before
/// `A`), punctuation sorts before digits and digits before letters. Names the
/// collator considers equal fall back to raw code points, so the order is
/// total.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    COLLATOR
        .with(|collator| match collator {
            Some(collator) => collator.compare(a, b),
            None => a.to_lowercase().cmp(&b.to_lowercase()),
        })
        .then_with(|| a.cmp(b))
}
