//! The persisted annotation document and its normalization.
//!
//! Every load and every save goes through [`normalize`], which turns any JSON
//! value into a schema-valid [`AnnotationState`]. Fields are repaired one at a
//! time: a wrong-typed field falls back to its default while the rest of the
//! document is kept, and unknown fields are dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::path_key::PathKey;

/// Colour assigned to a newly created label when none is chosen.
pub const DEFAULT_LABEL_COLOR: &str = "#329AF8";

/// Colour used for a stored label whose colour is missing or invalid.
pub const FALLBACK_LABEL_COLOR: &str = "#22c55e";

/// Preset label colours offered by the page, with display names.
pub const COLOR_PRESETS: [(&str, &str); 7] = [
    ("#FB6265", "red"),
    ("#FA9D5C", "orange"),
    ("#FBD854", "yellow"),
    ("#32D275", "green"),
    ("#329AF8", "blue"),
    ("#E051ED", "purple"),
    ("#9B9B9F", "grey"),
];

/// A named, coloured tag. The id is the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            color: color.into(),
        }
    }
}

/// All user-authored metadata for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationState {
    pub labels: Vec<Label>,
    /// relPath -> assigned label ids, in assignment order
    pub label_map: BTreeMap<String, Vec<String>>,
    pub hidden_paths: Vec<String>,
    pub show_labels: bool,
    pub show_hidden: bool,
    pub disabled_labels: Vec<String>,
    pub expanded_paths: Vec<String>,
    pub note_content: String,
    pub note_visible: bool,
    /// relPath -> note text
    pub path_notes: BTreeMap<String, String>,
    /// label id -> note text
    pub label_notes: BTreeMap<String, String>,
}

impl Default for AnnotationState {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            label_map: BTreeMap::new(),
            hidden_paths: Vec::new(),
            show_labels: true,
            show_hidden: false,
            disabled_labels: Vec::new(),
            expanded_paths: Vec::new(),
            note_content: String::new(),
            note_visible: false,
            path_notes: BTreeMap::new(),
            label_notes: BTreeMap::new(),
        }
    }
}

impl AnnotationState {
    /// Re-run normalization over an already typed value.
    pub fn normalized(&self) -> Self {
        match serde_json::to_value(self) {
            Ok(value) => normalize(&value),
            Err(_) => self.clone(),
        }
    }

    pub fn label(&self, id: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.id == id)
    }

    pub fn label_ids(&self) -> BTreeSet<&str> {
        self.labels.iter().map(|l| l.id.as_str()).collect()
    }
}

/// Parse a request body and normalize it.
///
/// An empty body is treated as `{}`.
pub fn normalize_json_str(body: &str) -> Result<AnnotationState, SyncError> {
    if body.trim().is_empty() {
        return Ok(AnnotationState::default());
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| SyncError::MalformedInput(e.to_string()))?;
    Ok(normalize(&value))
}

/// Repair any JSON value into a well-typed annotation document.
pub fn normalize(raw: &Value) -> AnnotationState {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let defaults = AnnotationState::default();

    AnnotationState {
        labels: normalize_labels(obj.get("labels")),
        label_map: normalize_label_map(obj.get("labelMap")),
        hidden_paths: path_set(obj.get("hiddenPaths"))
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect(),
        show_labels: bool_or(obj.get("showLabels"), defaults.show_labels),
        show_hidden: bool_or(obj.get("showHidden"), defaults.show_hidden),
        disabled_labels: string_set(obj.get("disabledLabels")),
        expanded_paths: path_set(obj.get("expandedPaths")),
        note_content: obj
            .get("noteContent")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        note_visible: bool_or(obj.get("noteVisible"), defaults.note_visible),
        path_notes: string_map(obj.get("pathNotes"), |k| PathKey::normalize(k).into_string()),
        label_notes: string_map(obj.get("labelNotes"), str::to_string),
    }
}

fn bool_or(value: Option<&Value>, default: bool) -> bool {
    value.and_then(Value::as_bool).unwrap_or(default)
}

/// Strings of an array, duplicates removed, first occurrence wins.
fn string_set(value: Option<&Value>) -> Vec<String> {
    dedup(strings(value).map(str::to_string))
}

/// Like `string_set`, with every entry normalized as a path key.
fn path_set(value: Option<&Value>) -> Vec<String> {
    dedup(strings(value).map(|s| PathKey::normalize(s).into_string()))
}

fn strings(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

fn string_map(value: Option<&Value>, key: impl Fn(&str) -> String) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(k, v)| v.as_str().map(|text| (key(k), text.to_string())))
        .collect()
}

fn normalize_label_map(value: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(obj) = value.and_then(Value::as_object) else {
        return out;
    };
    for (path, ids) in obj {
        let Some(ids) = ids.as_array() else {
            continue;
        };
        // Duplicate ids are kept as stored.
        out.entry(PathKey::normalize(path).into_string())
            .or_default()
            .extend(ids.iter().filter_map(Value::as_str).map(str::to_string));
    }
    out
}

fn normalize_labels(value: Option<&Value>) -> Vec<Label> {
    let mut seen = BTreeSet::new();
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(normalize_label)
        .filter(|label| seen.insert(label.id.clone()))
        .collect()
}

fn normalize_label(value: &Value) -> Option<Label> {
    let obj = value.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let id = text("id");
    let name = text("name");
    let (id, name) = match (id, name) {
        (Some(id), Some(name)) => (id, name),
        (Some(id), None) => (id.clone(), id),
        (None, Some(name)) => (name.clone(), name),
        (None, None) => return None,
    };
    let color = text("color")
        .filter(|c| is_hex_color(c))
        .unwrap_or_else(|| FALLBACK_LABEL_COLOR.to_string());
    Some(Label { id, name, color })
}

/// `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}
