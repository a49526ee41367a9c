//! Settings resolution.
//!
//! Each setting comes from the first of: command-line flag or environment
//! variable, the JSON config file, the built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tree_core::persistence::{BackendOptions, RemoteOptions};
use tree_core::tree::{TreeBuilder, DEFAULT_IGNORE};
use tree_core::TreeSource;

use crate::remote::DEFAULT_CONNECT_TIMEOUT;

pub const DEFAULT_CONFIG_FILE: &str = "tree-map.json";

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// JSON config file
    #[arg(long, global = true, env = "TREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory to map
    #[arg(long, global = true, env = "TREE_PROJECT_ROOT")]
    pub root: Option<PathBuf>,

    /// Entry names to skip, comma separated
    #[arg(long, global = true, env = "TREE_IGNORE", value_delimiter = ',')]
    pub ignore: Option<Vec<String>>,

    /// Directory holding `<project>/state.json`
    #[arg(long, global = true, env = "TREE_STATE_ROOT")]
    pub state_root: Option<PathBuf>,

    /// Remote store connection string
    #[arg(long, global = true, env = "TREE_REMOTE_URI")]
    pub remote_uri: Option<String>,

    /// Remote database name
    #[arg(long, global = true, env = "TREE_REMOTE_DB")]
    pub remote_db: Option<String>,

    /// Remote collection name
    #[arg(long, global = true, env = "TREE_REMOTE_COLLECTION")]
    pub remote_collection: Option<String>,

    /// Refuse to start without the remote store
    #[arg(
        long,
        global = true,
        env = "TREE_REQUIRE_REMOTE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    pub require_remote: Option<bool>,

    /// How long the single remote connection attempt may take, in milliseconds
    #[arg(long, global = true, env = "TREE_REMOTE_TIMEOUT_MS")]
    pub remote_timeout_ms: Option<u64>,

    /// Port to listen on (0 picks a free port)
    #[arg(long, global = true, env = "TREE_PREFER_PORT")]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long, global = true, env = "TREE_BIND")]
    pub bind: Option<String>,

    /// Stylesheet served at /style.css instead of the bundled one
    #[arg(long, global = true, env = "TREE_STYLESHEET")]
    pub stylesheet: Option<PathBuf>,

    /// PNG used as the folder icon
    #[arg(long, global = true, env = "TREE_FOLDER_ICON")]
    pub folder_icon: Option<PathBuf>,

    /// Write a copy of the rendered page here
    #[arg(long, global = true, env = "TREE_OUTPUT_HTML")]
    pub output_html: Option<PathBuf>,
}

/// Accepts `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("expected a boolean, got {:?}", other)),
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default)]
    pub project_root: Option<PathBuf>,

    #[serde(default)]
    pub ignore: Option<Vec<String>>,

    #[serde(default)]
    pub state_root: Option<PathBuf>,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub prefer_port: Option<u16>,

    #[serde(default)]
    pub bind: Option<String>,

    #[serde(default)]
    pub stylesheet: Option<PathBuf>,

    #[serde(default)]
    pub folder_icon: Option<PathBuf>,

    #[serde(default)]
    pub output_html: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub collection: Option<String>,

    #[serde(default)]
    pub require: Option<bool>,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Load the config file, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: FileConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub ignore: Vec<String>,
    pub state_root: PathBuf,
    pub remote_uri: Option<String>,
    pub remote_database: String,
    pub remote_collection: String,
    pub require_remote: bool,
    pub remote_timeout: Duration,
    pub port: u16,
    pub bind: String,
    pub stylesheet: Option<PathBuf>,
    pub folder_icon: Option<PathBuf>,
    pub output_html: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(args: &SettingsArgs) -> Result<Self> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = FileConfig::load(&path)?;
        Ok(Self::merge(args.clone(), file))
    }

    pub fn merge(args: SettingsArgs, file: FileConfig) -> Self {
        let remote = file.remote;
        Self {
            root: args
                .root
                .or(file.project_root)
                .unwrap_or_else(|| PathBuf::from(".")),
            ignore: args
                .ignore
                .or(file.ignore)
                .map(clean_names)
                .unwrap_or_else(|| DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect()),
            state_root: args
                .state_root
                .or(file.state_root)
                .unwrap_or_else(|| PathBuf::from("state")),
            remote_uri: args
                .remote_uri
                .or(remote.uri)
                .filter(|uri| !uri.trim().is_empty()),
            remote_database: args
                .remote_db
                .or(remote.database)
                .unwrap_or_else(|| "modules_DB".to_string()),
            remote_collection: args
                .remote_collection
                .or(remote.collection)
                .unwrap_or_else(|| "tree".to_string()),
            require_remote: args.require_remote.or(remote.require).unwrap_or(false),
            remote_timeout: args
                .remote_timeout_ms
                .or(remote.connect_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            port: args.port.or(file.prefer_port).unwrap_or(0),
            bind: args
                .bind
                .or(file.bind)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            stylesheet: args.stylesheet.or(file.stylesheet),
            folder_icon: args.folder_icon.or(file.folder_icon),
            output_html: args.output_html.or(file.output_html),
        }
    }

    /// Absolute root path; fails if the root does not exist.
    pub fn canonical_root(&self) -> Result<PathBuf> {
        std::fs::canonicalize(&self.root)
            .with_context(|| format!("Project root not found: {:?}", self.root))
    }

    pub fn remote(&self) -> Option<RemoteOptions> {
        self.remote_uri.as_ref().map(|uri| RemoteOptions {
            uri: uri.clone(),
            database: self.remote_database.clone(),
            collection: self.remote_collection.clone(),
        })
    }

    pub fn tree_source(&self, root: PathBuf) -> TreeSource {
        TreeSource::new(root, TreeBuilder::new(self.ignore.iter().cloned()))
    }

    pub fn backend_options(&self, project: &str) -> BackendOptions {
        BackendOptions {
            project: project.to_string(),
            state_root: self.state_root.clone(),
            remote: self.remote(),
            require_remote: self.require_remote,
        }
    }
}

fn clean_names(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::merge(SettingsArgs::default(), FileConfig::default());
        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.ignore, vec!["node_modules", ".git", ".cursor", ".DS_Store"]);
        assert_eq!(settings.state_root, PathBuf::from("state"));
        assert_eq!(settings.remote_uri, None);
        assert_eq!(settings.remote_database, "modules_DB");
        assert_eq!(settings.remote_collection, "tree");
        assert!(!settings.require_remote);
        assert_eq!(settings.remote_timeout, Duration::from_secs(10));
        assert_eq!(settings.port, 0);
        assert_eq!(settings.bind, "127.0.0.1");
        assert!(settings.remote().is_none());
    }

    #[test]
    fn test_args_override_file() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "projectRoot": "/from/file",
                "ignore": ["target"],
                "preferPort": 8080,
                "remote": {
                    "uri": "mongodb://file",
                    "database": "db",
                    "require": true,
                    "connectTimeoutMs": 2500
                }
            }"#,
        )
        .unwrap();
        let args = SettingsArgs {
            root: Some(PathBuf::from("/from/args")),
            remote_uri: Some("mongodb://args".into()),
            require_remote: Some(false),
            ..SettingsArgs::default()
        };

        let settings = Settings::merge(args, file);
        assert_eq!(settings.root, PathBuf::from("/from/args"));
        assert_eq!(settings.ignore, vec!["target"]);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.remote_uri.as_deref(), Some("mongodb://args"));
        assert_eq!(settings.remote_database, "db");
        assert_eq!(settings.remote_collection, "tree");
        assert!(!settings.require_remote);
        assert_eq!(settings.remote_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_blank_uri_is_absent() {
        let args = SettingsArgs {
            remote_uri: Some("  ".into()),
            ..SettingsArgs::default()
        };
        let settings = Settings::merge(args, FileConfig::default());
        assert!(settings.remote().is_none());
        assert!(settings.backend_options("p").remote.is_none());
    }

    #[test]
    fn test_ignore_names_are_trimmed() {
        let args = SettingsArgs {
            ignore: Some(vec![" target ".into(), "".into(), "dist".into()]),
            ..SettingsArgs::default()
        };
        let settings = Settings::merge(args, FileConfig::default());
        assert_eq!(settings.ignore, vec!["target", "dist"]);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Ok(true));
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag("0"), Ok(false));
        assert_eq!(parse_flag("false"), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = FileConfig::load(&temp.path().join("absent.json")).unwrap();
        assert!(config.project_root.is_none());
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tree-map.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn test_canonical_root() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::merge(SettingsArgs::default(), FileConfig::default());
        settings.root = temp.path().join("missing");
        assert!(settings.canonical_root().is_err());

        settings.root = temp.path().to_path_buf();
        assert!(settings.canonical_root().unwrap().is_absolute());
    }
}
