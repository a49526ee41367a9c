//! One-shot copy of local state files into the document store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tree_core::normalize_json_str;
use tree_core::persistence::{
    DocumentCollection, DocumentStoreBackend, StateBackend, STATE_FILE_NAME,
};

/// Outcome of a migration run, by project name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<String>,
    /// Directories without a state file
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Upsert every `<state_root>/<project>/state.json` under its directory name.
///
/// A project that fails is reported and the run continues. A missing state
/// root migrates nothing.
pub async fn migrate_state_root(
    state_root: &Path,
    collection: Arc<dyn DocumentCollection>,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    if !state_root.exists() {
        info!("No state root at {:?}, nothing to migrate", state_root);
        return Ok(report);
    }

    let mut projects = Vec::new();
    let mut entries = tokio::fs::read_dir(state_root)
        .await
        .with_context(|| format!("Failed to read state root: {:?}", state_root))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            projects.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    projects.sort();

    if projects.is_empty() {
        info!("No projects to migrate under {:?}", state_root);
        return Ok(report);
    }

    for project in projects {
        let state_file = state_root.join(&project).join(STATE_FILE_NAME);
        if !state_file.exists() {
            warn!("No {} for {}, skipping", STATE_FILE_NAME, project);
            report.skipped.push(project);
            continue;
        }

        match migrate_one(&state_file, &project, collection.clone()).await {
            Ok(()) => {
                info!("Migrated {}", project);
                report.migrated.push(project);
            }
            Err(e) => {
                warn!("Failed to migrate {}: {:#}", project, e);
                report.failed.push((project, format!("{:#}", e)));
            }
        }
    }

    info!(
        "Migration finished: {} migrated, {} skipped, {} failed",
        report.migrated.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

async fn migrate_one(
    state_file: &Path,
    project: &str,
    collection: Arc<dyn DocumentCollection>,
) -> Result<()> {
    let content = tokio::fs::read_to_string(state_file)
        .await
        .with_context(|| format!("Failed to read {:?}", state_file))?;
    // Unlike a request body, an empty legacy file is not a document.
    if content.trim().is_empty() {
        anyhow::bail!("{:?} is empty", state_file);
    }
    let state = normalize_json_str(&content)
        .with_context(|| format!("Failed to parse {:?}", state_file))?;
    DocumentStoreBackend::new(project, collection)
        .save(&state)
        .await
        .context("Failed to upsert document")?;
    Ok(())
}
