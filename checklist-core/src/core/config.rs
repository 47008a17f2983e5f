//! Gateway configuration.
//!
//! Stored as a JSON file at an OS-appropriate location. A missing or corrupt
//! file falls back to defaults so a fresh install works out of the box.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the persistence gateway keeps things in the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Base URL of the blob store proxy. Only used with the `remote` feature.
    pub base_url: String,
    pub checklist_dir: String,
    pub users_file: String,
    pub fields_file: String,
    pub layouts_file: String,
    /// Directory attachments are uploaded to.
    pub attachments_dir: String,
    /// External `.json` documents that may be imported as option sources.
    pub external_sources: Vec<String>,
    /// How many edits the in-memory journal keeps.
    pub journal_keep_last: usize,
    /// User whose access index is updated on load and save.
    pub user_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            checklist_dir: "checklists".to_string(),
            users_file: "config/users.json".to_string(),
            fields_file: "config/fields.json".to_string(),
            layouts_file: "config/layouts.json".to_string(),
            attachments_dir: "files".to_string(),
            external_sources: vec!["config/users.json".to_string()],
            journal_keep_last: 500,
            user_id: None,
        }
    }
}

impl GatewayConfig {
    /// Blob path of a checklist file name inside [`checklist_dir`](Self::checklist_dir).
    #[must_use]
    pub fn checklist_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.checklist_dir.trim_end_matches('/'), file_name)
    }

    /// Blob path an attachment named `name` is uploaded to.
    #[must_use]
    pub fn attachment_path(&self, name: &str) -> String {
        format!("{}/{}", self.attachments_dir.trim_end_matches('/'), name)
    }

    /// Whether `name` may be imported as an external option source.
    #[must_use]
    pub fn is_whitelisted_source(&self, name: &str) -> bool {
        self.external_sources.iter().any(|s| s == name)
    }
}

/// Returns the path to the config file.
///
/// - Linux: `~/.config/checklist/config.json`
/// - macOS: `~/Library/Application Support/checklist/config.json`
/// - Windows: `%APPDATA%/checklist/config.json`
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join("checklist")
        .join("config.json")
}

/// Loads the config at `path`; returns defaults if the file is missing or corrupt.
pub fn load_config(path: &Path) -> GatewayConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Config at {} is unreadable ({e}); using defaults", path.display());
            GatewayConfig::default()
        }),
        Err(_) => GatewayConfig::default(),
    }
}

/// Saves the config to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`crate::ChecklistError::Io`] if the file cannot be written.
pub fn save_config(path: &Path, config: &GatewayConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("absent.json"));
        assert_eq!(cfg, GatewayConfig::default());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_config(&path), GatewayConfig::default());
    }

    #[test]
    fn test_save_then_load_with_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = GatewayConfig {
            checklist_dir: "lists/".to_string(),
            user_id: Some("u1".to_string()),
            ..GatewayConfig::default()
        };
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path), cfg);
        assert_eq!(cfg.checklist_path("a.json"), "lists/a.json");

        fs::write(&path, r#"{"usersFile": "u.json"}"#).unwrap();
        let partial = load_config(&path);
        assert_eq!(partial.users_file, "u.json");
        assert_eq!(partial.checklist_dir, "checklists");
    }

    #[test]
    fn test_default_path_ends_in_checklist_dir() {
        let path = default_config_path();
        assert!(path.ends_with("checklist/config.json"));
    }
}
