//! Per-viewer annotation state.
//!
//! An `AnnotationSession` holds one viewer's working copy of the annotation
//! document plus transient view state (selection, label filter, the label
//! applied on click). Every mutator returns whether the persisted document
//! changed, which is what the reconciler uses to schedule a save.

use std::collections::{BTreeMap, BTreeSet};

use crate::annotations::{is_hex_color, AnnotationState, Label, DEFAULT_LABEL_COLOR};
use crate::error::SessionError;
use crate::path_key::{full_path, PathKey};
use crate::tree::TreeNode;

#[derive(Debug, Clone, Default)]
pub struct AnnotationSession {
    state: AnnotationState,
    selected: Option<String>,
    filter: BTreeSet<String>,
    apply_label: Option<String>,
}

impl AnnotationSession {
    pub fn new(state: AnnotationState) -> Self {
        let mut session = Self {
            state: state.normalized(),
            ..Self::default()
        };
        session.prune_label_refs();
        session
    }

    pub fn state(&self) -> &AnnotationState {
        &self.state
    }

    /// Replace the document with an authoritative copy.
    ///
    /// The label filter is cleared; selection survives.
    pub fn replace_state(&mut self, state: AnnotationState) {
        self.state = state.normalized();
        self.filter.clear();
        self.prune_label_refs();
    }

    // ---- selection ----

    pub fn select(&mut self, path: Option<&str>) {
        self.selected = path.map(|p| PathKey::normalize(p).into_string());
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Text for the copy shortcut: the selected entry's name, or with
    /// `full` its path joined onto `root_display`.
    pub fn copy_text(&self, tree: &TreeNode, root_display: &str, full: bool) -> Option<String> {
        let selected = self.selected.as_deref()?;
        let node = tree.find(selected)?;
        if full {
            Some(full_path(root_display, &node.rel_path))
        } else {
            Some(node.name.clone())
        }
    }

    /// Drop the selection if its path is no longer in `tree`.
    pub fn retain_selection(&mut self, tree: &TreeNode) {
        if let Some(path) = &self.selected {
            if tree.find(path).is_none() {
                self.selected = None;
            }
        }
    }

    // ---- hidden ----

    pub fn is_hidden(&self, path: &str) -> bool {
        let key = PathKey::normalize(path);
        self.state.hidden_paths.iter().any(|p| p == key.as_str())
    }

    pub fn set_hidden(&mut self, path: &str, hidden: bool) -> Result<bool, SessionError> {
        let key = non_root(path)?;
        Ok(set_member(&mut self.state.hidden_paths, key.as_str(), hidden))
    }

    pub fn toggle_hidden(&mut self, path: &str) -> Result<bool, SessionError> {
        let hidden = self.is_hidden(path);
        self.set_hidden(path, !hidden)
    }

    // ---- expanded ----

    /// The root is always expanded.
    pub fn is_expanded(&self, path: &str) -> bool {
        let key = PathKey::normalize(path);
        key.is_root() || self.state.expanded_paths.iter().any(|p| p == key.as_str())
    }

    pub fn set_expanded(&mut self, path: &str, expanded: bool) -> bool {
        let key = PathKey::normalize(path);
        if key.is_root() {
            return false;
        }
        set_member(&mut self.state.expanded_paths, key.as_str(), expanded)
    }

    pub fn toggle_expanded(&mut self, path: &str) -> bool {
        let expanded = self.is_expanded(path);
        self.set_expanded(path, !expanded)
    }

    // ---- labels ----

    /// Create a label, or recolour the existing label with that name.
    ///
    /// The label becomes the one applied on click.
    pub fn create_label(&mut self, name: &str, color: Option<&str>) -> Result<bool, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyLabelName);
        }
        let color = color
            .filter(|c| is_hex_color(c))
            .unwrap_or(DEFAULT_LABEL_COLOR);

        let changed = match self.state.labels.iter_mut().find(|l| l.id == name) {
            Some(existing) if existing.color == color => false,
            Some(existing) => {
                existing.color = color.to_string();
                true
            }
            None => {
                self.state.labels.push(Label::new(name, color));
                true
            }
        };
        self.apply_label = Some(name.to_string());
        self.prune_label_refs();
        Ok(changed)
    }

    /// Delete a label and every reference to it.
    pub fn delete_label(&mut self, id: &str) -> bool {
        let before = self.state.labels.len();
        self.state.labels.retain(|l| l.id != id);
        if self.state.labels.len() == before {
            return false;
        }
        for ids in self.state.label_map.values_mut() {
            ids.retain(|assigned| assigned != id);
        }
        self.state.label_map.retain(|_, ids| !ids.is_empty());
        self.state.label_notes.remove(id);
        if self.apply_label.as_deref() == Some(id) {
            self.apply_label = None;
        }
        self.prune_label_refs();
        true
    }

    pub fn set_label_disabled(&mut self, id: &str, disabled: bool) -> Result<bool, SessionError> {
        self.require_label(id)?;
        Ok(set_member(&mut self.state.disabled_labels, id, disabled))
    }

    pub fn set_apply_label(&mut self, id: Option<&str>) -> Result<(), SessionError> {
        if let Some(id) = id {
            self.require_label(id)?;
        }
        self.apply_label = id.map(str::to_string);
        Ok(())
    }

    pub fn apply_label(&self) -> Option<&str> {
        self.apply_label.as_deref()
    }

    /// Add `id` to the path if absent, otherwise remove one occurrence.
    pub fn toggle_label_for_path(&mut self, path: &str, id: &str) -> Result<bool, SessionError> {
        let key = non_root(path)?;
        self.require_label(id)?;
        let ids = self.state.label_map.entry(key.as_str().to_string()).or_default();
        match ids.iter().position(|assigned| assigned == id) {
            Some(idx) => {
                ids.remove(idx);
            }
            None => ids.push(id.to_string()),
        }
        self.drop_empty_assignment(key.as_str());
        Ok(true)
    }

    /// Toggle the current click label on `path`.
    pub fn toggle_apply_label(&mut self, path: &str) -> Result<bool, SessionError> {
        let id = self
            .apply_label
            .clone()
            .ok_or_else(|| SessionError::UnknownLabel(String::new()))?;
        self.toggle_label_for_path(path, &id)
    }

    /// Assign without creating a duplicate entry.
    pub fn assign_label(&mut self, path: &str, id: &str) -> Result<bool, SessionError> {
        let key = non_root(path)?;
        self.require_label(id)?;
        let ids = self.state.label_map.entry(key.into_string()).or_default();
        if ids.iter().any(|assigned| assigned == id) {
            return Ok(false);
        }
        ids.push(id.to_string());
        Ok(true)
    }

    /// Remove every occurrence of `id` from the path.
    pub fn unassign_label(&mut self, path: &str, id: &str) -> bool {
        let key = PathKey::normalize(path);
        match self.state.label_map.get_mut(key.as_str()) {
            Some(ids) => {
                let before = ids.len();
                ids.retain(|assigned| assigned != id);
                let changed = ids.len() != before;
                self.drop_empty_assignment(key.as_str());
                changed
            }
            None => false,
        }
    }

    /// Labels shown as dots on `path`: assigned, existing, not disabled.
    pub fn labels_for_path(&self, path: &str) -> Vec<&Label> {
        let key = PathKey::normalize(path);
        self.state
            .label_map
            .get(key.as_str())
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.label(id))
            .filter(|label| !self.state.disabled_labels.contains(&label.id))
            .collect()
    }

    // ---- notes and toggles ----

    pub fn set_note(&mut self, text: &str) -> bool {
        replace_if_changed(&mut self.state.note_content, text.to_string())
    }

    pub fn set_note_visible(&mut self, visible: bool) -> bool {
        replace_if_changed(&mut self.state.note_visible, visible)
    }

    pub fn toggle_show_labels(&mut self) -> bool {
        self.state.show_labels = !self.state.show_labels;
        true
    }

    pub fn toggle_show_hidden(&mut self) -> bool {
        self.state.show_hidden = !self.state.show_hidden;
        true
    }

    /// Empty text removes the note.
    pub fn set_path_note(&mut self, path: &str, text: &str) -> bool {
        let key = PathKey::normalize(path).into_string();
        set_note_entry(&mut self.state.path_notes, key, text)
    }

    pub fn path_note(&self, path: &str) -> Option<&str> {
        let key = PathKey::normalize(path);
        self.state.path_notes.get(key.as_str()).map(String::as_str)
    }

    /// Empty text removes the note.
    pub fn set_label_note(&mut self, id: &str, text: &str) -> Result<bool, SessionError> {
        self.require_label(id)?;
        Ok(set_note_entry(&mut self.state.label_notes, id.to_string(), text))
    }

    // ---- filter ----

    pub fn filter(&self) -> &BTreeSet<String> {
        &self.filter
    }

    pub fn set_filter_label(&mut self, id: &str, selected: bool) -> Result<(), SessionError> {
        if selected {
            self.require_label(id)?;
            self.filter.insert(id.to_string());
        } else {
            self.filter.remove(id);
        }
        Ok(())
    }

    pub fn clear_filter(&mut self) {
        self.filter.clear();
    }

    /// Paths that pass the label filter.
    ///
    /// A path passes if it or any descendant carries a selected label. With
    /// no filter every path passes.
    pub fn visible_paths(&self, tree: &TreeNode) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if self.filter.is_empty() {
            out.extend(tree.walk().into_iter().map(|n| n.rel_path.clone()));
        } else {
            self.mark_filtered(tree, &mut out);
        }
        out
    }

    fn mark_filtered(&self, node: &TreeNode, out: &mut BTreeSet<String>) -> bool {
        let own = self
            .state
            .label_map
            .get(&node.rel_path)
            .is_some_and(|ids| ids.iter().any(|id| self.filter.contains(id)));
        let mut descendant = false;
        for child in node.children() {
            // Visit every child so each subtree is marked.
            descendant |= self.mark_filtered(child, out);
        }
        let hit = own || descendant;
        if hit {
            out.insert(node.rel_path.clone());
        }
        hit
    }

    /// Paths actually shown: past the filter, and not under a hidden
    /// path unless hidden entries are shown.
    pub fn displayed_paths(&self, tree: &TreeNode) -> BTreeSet<String> {
        let visible = self.visible_paths(tree);
        let mut out = BTreeSet::new();
        self.mark_displayed(tree, &visible, &mut out);
        out
    }

    fn mark_displayed(&self, node: &TreeNode, visible: &BTreeSet<String>, out: &mut BTreeSet<String>) {
        if !visible.contains(&node.rel_path) {
            return;
        }
        if !self.state.show_hidden && self.is_hidden(&node.rel_path) {
            return;
        }
        out.insert(node.rel_path.clone());
        for child in node.children() {
            self.mark_displayed(child, visible, out);
        }
    }

    // ---- helpers ----

    /// A path with no labels left has no entry.
    fn drop_empty_assignment(&mut self, key: &str) {
        if self.state.label_map.get(key).is_some_and(Vec::is_empty) {
            self.state.label_map.remove(key);
        }
    }

    fn require_label(&self, id: &str) -> Result<(), SessionError> {
        match self.state.label(id) {
            Some(_) => Ok(()),
            None => Err(SessionError::UnknownLabel(id.to_string())),
        }
    }

    /// Drop disabled and filtered ids that no longer name a label.
    fn prune_label_refs(&mut self) {
        let ids: BTreeSet<String> = self.state.labels.iter().map(|l| l.id.clone()).collect();
        self.state.disabled_labels.retain(|id| ids.contains(id));
        self.filter.retain(|id| ids.contains(id));
        if let Some(apply) = &self.apply_label {
            if !ids.contains(apply) {
                self.apply_label = None;
            }
        }
    }
}

fn non_root(path: &str) -> Result<PathKey, SessionError> {
    let key = PathKey::normalize(path);
    if key.is_root() {
        return Err(SessionError::RootPath);
    }
    Ok(key)
}

/// Insert or remove `item` in an ordered set stored as a Vec.
fn set_member(set: &mut Vec<String>, item: &str, present: bool) -> bool {
    let pos = set.iter().position(|s| s == item);
    match (pos, present) {
        (None, true) => {
            set.push(item.to_string());
            true
        }
        (Some(idx), false) => {
            set.remove(idx);
            true
        }
        _ => false,
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn set_note_entry(notes: &mut BTreeMap<String, String>, key: String, text: &str) -> bool {
    if text.is_empty() {
        return notes.remove(&key).is_some();
    }
    match notes.get(&key) {
        Some(existing) if existing == text => false,
        _ => {
            notes.insert(key, text.to_string());
            true
        }
    }
}
