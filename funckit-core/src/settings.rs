//! Tooling manager configuration.
//!
//! Settings can be built in code by an embedding application or loaded from
//! a JSON file for the CLI. Loading is tolerant: a missing or corrupt file
//! yields the defaults, with a warning for the corrupt case.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Public release feed for Azure Functions Core Tools.
pub const DEFAULT_FEED_URL: &str = "https://functionscdn.azureedge.net/public/cli-feed-v4.json";

/// How many complete tag folders to keep per runtime version when pruning.
pub const DEFAULT_RETENTION_COUNT: usize = 5;

/// A user-pinned Core Tools location for one runtime version. An empty
/// `tool_path` means the version is managed by the downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPathEntry {
    pub runtime_version: String,
    #[serde(default)]
    pub tool_path: String,
}

/// Configuration for the Core Tools manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolingSettings {
    /// Release feed URL.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Root directory the version/tag folders live under.
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,
    /// Complete tag folders to keep per version when pruning.
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
    /// Per-version path pins; consulted before the download root.
    #[serde(default)]
    pub tool_path_overrides: Vec<ToolPathEntry>,
}

impl Default for ToolingSettings {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            download_root: default_download_root(),
            retention_count: default_retention_count(),
            tool_path_overrides: Vec::new(),
        }
    }
}

impl ToolingSettings {
    /// The override entry for `runtime_version`, if one with a non-empty
    /// path exists. Matching is case-insensitive.
    pub fn override_for(&self, runtime_version: &str) -> Option<&ToolPathEntry> {
        self.tool_path_overrides.iter().find(|entry| {
            entry.runtime_version.eq_ignore_ascii_case(runtime_version)
                && !entry.tool_path.is_empty()
        })
    }
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_download_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("funckit").join("coreTools"))
        .unwrap_or_else(|| PathBuf::from(".funckit/coreTools"))
}

fn default_retention_count() -> usize {
    DEFAULT_RETENTION_COUNT
}

/// Default location of the CLI settings file.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("funckit").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from(".funckit/settings.json"))
}

/// Loads settings from `path`. Missing file yields the defaults; a file
/// that fails to parse is logged and replaced by the defaults rather than
/// aborting startup.
pub fn load_settings(path: &Path) -> ToolingSettings {
    if !path.exists() {
        debug!("No settings file at {}, using defaults", path.display());
        return ToolingSettings::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read settings {}: {}", path.display(), err);
            return ToolingSettings::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(
                "Failed to parse settings {}: {}. Using defaults.",
                path.display(),
                err
            );
            ToolingSettings::default()
        }
    }
}

/// Saves settings as pretty-printed JSON, creating parent directories.
pub fn save_settings(settings: &ToolingSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(settings).context("Failed to encode settings")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    debug!("Settings saved to {}", path.display());
    Ok(())
}
