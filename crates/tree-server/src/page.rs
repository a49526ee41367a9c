//! The served page.
//!
//! The page embeds the startup snapshot as JSON and carries the in-page
//! controller script, which immediately refetches `/state` and then keeps the
//! store in sync.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::warn;
use tree_core::annotations::{COLOR_PRESETS, DEFAULT_LABEL_COLOR, FALLBACK_LABEL_COLOR};
use tree_core::service::PageSnapshot;
use tree_core::{AnnotationState, TreeNode};

pub const BUNDLED_CSS: &str = include_str!("../assets/tree.css");
const CONTROLLER_JS: &str = include_str!("../assets/tree.js");

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BootData<'a> {
    project: &'a str,
    root_dir: &'a str,
    tree: &'a TreeNode,
    state: &'a AnnotationState,
    folder_icon: Option<&'a str>,
    color_presets: Vec<Preset<'a>>,
    default_color: &'a str,
    fallback_color: &'a str,
    debounce_ms: u64,
    poll_interval_ms: u64,
}

#[derive(Serialize)]
struct Preset<'a> {
    color: &'a str,
    name: &'a str,
}

/// Render the full page for a startup snapshot.
pub fn render_page(snapshot: &PageSnapshot, folder_icon: Option<&str>) -> String {
    let boot = BootData {
        project: &snapshot.project,
        root_dir: &snapshot.root_display,
        tree: &snapshot.tree,
        state: &snapshot.state,
        folder_icon,
        color_presets: COLOR_PRESETS
            .iter()
            .map(|&(color, name)| Preset { color, name })
            .collect(),
        default_color: DEFAULT_LABEL_COLOR,
        fallback_color: FALLBACK_LABEL_COLOR,
        debounce_ms: 300,
        poll_interval_ms: 30_000,
    };
    let data = serde_json::to_string(&boot).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Directory Tree - {project}</title>
    <link rel="stylesheet" href="/style.css">
</head>
<body>
    <header class="toolbar">
        <h1 title="{root}">{project}</h1>
        <div class="controls">
            <input type="text" id="label-name" placeholder="Label name">
            <select id="label-color-preset"></select>
            <input type="color" id="label-color" value="{default_color}">
            <button id="add-label">Add label</button>
            <span id="apply-label-swatch" class="swatch"></span>
            <select id="apply-label"></select>
            <button id="delete-label">Delete label</button>
            <div class="filter">
                <button id="filter-selected" class="filter-trigger"></button>
                <div id="filter-panel" class="filter-panel"></div>
            </div>
            <button id="toggle-labels"></button>
            <button id="toggle-hidden"></button>
            <button id="toggle-notes"></button>
            <button id="refresh-tree">Refresh tree</button>
        </div>
        <div id="path-panel" class="path-panel empty"><span id="path-panel-text"></span></div>
    </header>
    <main>
        <div id="tree-root"></div>
        <aside class="note-panel" id="note-panel">
            <div class="note-header">
                <span>Notes</span>
                <button id="note-close" class="note-close" title="Close">&times;</button>
            </div>
            <textarea id="note-text" placeholder="Project notes"></textarea>
            <div id="note-path" class="note-path"></div>
            <textarea id="path-note-text" placeholder="Note for the selected entry"></textarea>
        </aside>
    </main>
    <script id="tree-data" type="application/json">{data}</script>
    <script>
{script}
    </script>
</body>
</html>"#,
        project = escape_html(&snapshot.project),
        root = escape_html(&snapshot.root_display),
        default_color = DEFAULT_LABEL_COLOR,
        data = escape_script_json(&data),
        script = CONTROLLER_JS,
    )
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Make JSON safe to place inside a `<script>` element.
fn escape_script_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

/// Read a PNG and encode it as a data URI. Failures fall back to the emoji icon.
pub fn folder_icon_data_uri(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", STANDARD.encode(bytes))),
        Err(e) => {
            warn!("Could not read folder icon {:?}, using the default: {}", path, e);
            None
        }
    }
}
