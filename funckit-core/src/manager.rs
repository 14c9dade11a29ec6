//! Caller-facing Core Tools manager.
//!
//! Ties the pieces together: disk cache first, then feed resolution and
//! download on a miss, plus the background update/prune pass. Failures
//! surface to callers as `None` with a log line; nothing in here panics or
//! escalates past the API boundary.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::ToolingCache;
use crate::download::Downloader;
use crate::feed::PlatformFilter;
use crate::settings::ToolingSettings;
use crate::versions;

/// Manages local Azure Functions Core Tools installations.
pub struct CoreToolsManager {
    settings: ToolingSettings,
    cache: ToolingCache,
    downloader: Downloader,
}

impl CoreToolsManager {
    pub fn new(settings: ToolingSettings) -> Self {
        let cache = ToolingCache::new(settings.feed_url.clone(), PlatformFilter::current());
        Self {
            settings,
            cache,
            downloader: Downloader::new(),
        }
    }

    pub fn settings(&self) -> &ToolingSettings {
        &self.settings
    }

    /// Returns the tool folder for `runtime_version`, downloading the
    /// latest release on a local miss.
    ///
    /// An empty version string falls back to the generation implied by
    /// `framework_hint` (e.g. `net8.0` -> `v4`). Returns `None` when the
    /// version cannot be determined, is unknown to the feed, or the
    /// download fails; the cause is logged.
    pub async fn get_or_download(
        &self,
        runtime_version: &str,
        framework_hint: Option<&str>,
    ) -> Option<PathBuf> {
        let version = self.effective_version(runtime_version, framework_hint)?;

        if let Some(existing) = self.get_cached_path_if_present(&version) {
            debug!("Found existing Core Tools at {}", existing.display());
            return Some(existing);
        }

        debug!("No local Core Tools for {}, downloading the latest", version);
        match self.download_latest(&version).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(
                    "Unable to provide Core Tools for version {}: {:#}",
                    version, err
                );
                None
            }
        }
    }

    /// Returns the locally available tool folder for `runtime_version`
    /// without touching the network: a configured override first, then the
    /// newest complete tag folder under the download root.
    pub fn get_cached_path_if_present(&self, runtime_version: &str) -> Option<PathBuf> {
        if let Some(pinned) = self.resolve_override(runtime_version) {
            debug!("Using pinned Core Tools path {}", pinned.display());
            return Some(pinned);
        }

        let version_dir = self.version_dir(runtime_version);
        if !version_dir.is_dir() {
            debug!(
                "No downloaded Core Tools under {} for version {}",
                self.settings.download_root.display(),
                runtime_version
            );
            return None;
        }
        versions::latest_tag_folder(&version_dir)
    }

    /// Refreshes every locally-managed runtime version to its current
    /// release and prunes broken and stale tag folders. Per-version
    /// failures are logged and skipped; the pass always completes.
    pub async fn update_all(&self) {
        let versions_to_update = self.managed_versions();
        if versions_to_update.is_empty() {
            debug!("No locally-managed Core Tools versions to update");
            return;
        }

        if let Err(err) = self.cache.ensure_loaded().await {
            warn!("Skipping Core Tools update, feed unavailable: {}", err);
            return;
        }

        for version in versions_to_update {
            match self.cache.resolve(&version).await {
                Some(release) => {
                    let dest = self
                        .version_dir(&release.runtime_version)
                        .join(&release.release_tag);
                    if let Err(err) = self.downloader.download_and_extract(&release, &dest).await
                    {
                        warn!("Unable to update Core Tools for {}: {}", version, err);
                    }
                }
                None => {
                    warn!("Release feed has no entry for managed version {}", version);
                }
            }

            let version_dir = self.version_dir(&version);
            versions::prune_empty(&version_dir);
            versions::prune_excess(&version_dir, self.settings.retention_count);
        }
        info!("Core Tools update pass finished");
    }

    /// Runtime versions the downloader owns: every version folder under the
    /// download root, plus override entries with an empty path whose folder
    /// exists.
    fn managed_versions(&self) -> Vec<String> {
        let mut managed: Vec<String> = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&self.settings.download_root) {
            for entry in entries.filter_map(|entry| entry.ok()) {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    managed.push(name.to_lowercase());
                }
            }
        }

        for entry in &self.settings.tool_path_overrides {
            if entry.tool_path.is_empty() {
                let version = entry.runtime_version.to_lowercase();
                if !managed.contains(&version) && self.version_dir(&version).is_dir() {
                    managed.push(version);
                }
            }
        }

        managed.sort();
        managed
    }

    async fn download_latest(&self, version: &str) -> Result<PathBuf> {
        self.cache
            .ensure_loaded()
            .await
            .context("release feed unavailable")?;

        let release = self
            .cache
            .resolve(version)
            .await
            .ok_or_else(|| anyhow!("release feed has no visible tag for version {version}"))?;

        let dest = self
            .version_dir(&release.runtime_version)
            .join(&release.release_tag);
        let path = self
            .downloader
            .download_and_extract(&release, &dest)
            .await
            .context("download failed")?;
        Ok(path)
    }

    fn version_dir(&self, runtime_version: &str) -> PathBuf {
        self.settings
            .download_root
            .join(runtime_version.to_lowercase())
    }

    /// Resolves a configured per-version path pin. A pin that names the
    /// executable itself is normalized to its parent folder; pins that do
    /// not exist on disk are ignored.
    fn resolve_override(&self, runtime_version: &str) -> Option<PathBuf> {
        let entry = self.settings.override_for(runtime_version)?;
        let pinned = PathBuf::from(&entry.tool_path);
        let folder = if pinned.is_file() && versions::is_core_tools_executable(&pinned) {
            pinned.parent()?.to_path_buf()
        } else {
            pinned
        };
        folder.is_dir().then_some(folder)
    }

    fn effective_version(
        &self,
        runtime_version: &str,
        framework_hint: Option<&str>,
    ) -> Option<String> {
        let trimmed = runtime_version.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_lowercase());
        }

        match framework_hint.and_then(default_version_for_framework) {
            Some(version) => {
                debug!(
                    "Runtime version not set, using {} for target framework {:?}",
                    version, framework_hint
                );
                Some(version.to_string())
            }
            None => {
                warn!(
                    "Cannot determine Core Tools version: no runtime version and no usable framework hint {:?}",
                    framework_hint
                );
                None
            }
        }
    }
}

/// Maps a .NET target framework moniker to the Functions generation it
/// defaults to when the project does not state a runtime version.
pub fn default_version_for_framework(framework: &str) -> Option<&'static str> {
    let framework = framework.trim().to_lowercase();
    if framework.is_empty() {
        return None;
    }
    if framework.starts_with("netcoreapp2") {
        return Some("v2");
    }
    if framework.starts_with("netcoreapp3") {
        return Some("v3");
    }
    if framework.starts_with("net4") {
        return Some("v1");
    }
    // net5.0 and later use the "netX.Y" shape.
    let digits: String = framework
        .strip_prefix("net")?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<u32>() {
        Ok(major) if major >= 5 => Some("v4"),
        _ => None,
    }
}
