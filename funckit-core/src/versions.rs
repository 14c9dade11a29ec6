//! On-disk version folder management.
//!
//! Downloaded releases live under `<root>/<runtime version>/<release tag>/`
//! with the `func` executable at the top of each tag folder. The tag folders
//! are the durable record of what is installed; this module scans them,
//! orders them by version, and prunes the ones that are broken or stale.

use semver::Version;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the Core Tools executable on this platform.
pub fn executable_name() -> &'static str {
    if cfg!(windows) {
        "func.exe"
    } else {
        "func"
    }
}

/// Expected executable location inside an extracted tag folder.
pub fn executable_path(tag_dir: &Path) -> PathBuf {
    tag_dir.join(executable_name())
}

/// Whether `path` names the Core Tools executable (any extension).
pub fn is_core_tools_executable(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.eq_ignore_ascii_case("func"))
}

/// Returns the newest tag folder under `version_dir` that contains the
/// executable, or `None` when no complete installation exists.
pub fn latest_tag_folder(version_dir: &Path) -> Option<PathBuf> {
    let latest = tag_folders_newest_first(version_dir)
        .into_iter()
        .find(|folder| executable_path(folder).exists());
    debug!(
        "Latest tag folder under {} is {:?}",
        version_dir.display(),
        latest
    );
    latest
}

/// Deletes tag folders that lack the executable (interrupted or partial
/// installs). Best effort: a folder that cannot be removed is logged and
/// skipped, never failing the pass.
pub fn prune_empty(version_dir: &Path) {
    for folder in tag_folders_newest_first(version_dir) {
        if executable_path(&folder).exists() {
            continue;
        }
        debug!("Tag folder {} has no executable, removing", folder.display());
        if let Err(err) = fs::remove_dir_all(&folder) {
            warn!("Failed to remove {}: {}", folder.display(), err);
        }
    }
}

/// Keeps the `retention` newest complete tag folders and deletes the rest,
/// oldest first. Call after [`prune_empty`] so incomplete folders do not
/// count against the retention budget.
pub fn prune_excess(version_dir: &Path, retention: usize) {
    let complete: Vec<PathBuf> = tag_folders_newest_first(version_dir)
        .into_iter()
        .filter(|folder| executable_path(folder).exists())
        .collect();
    if complete.len() <= retention {
        return;
    }

    for folder in complete[retention..].iter().rev() {
        debug!("Removing stale tag folder {}", folder.display());
        if let Err(err) = fs::remove_dir_all(folder) {
            warn!("Failed to remove {}: {}", folder.display(), err);
        }
    }
}

/// Immediate subdirectories of `version_dir`, sorted by version descending.
pub fn tag_folders_newest_first(version_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(version_dir) else {
        return Vec::new();
    };

    let mut folders: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    folders.sort_by(|a, b| compare_versions(folder_name(b), folder_name(a)));
    folders
}

fn folder_name(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or("")
}

/// Orders two version strings semantically: `4.10.0` > `4.9.0`.
///
/// Strict semver when both sides parse (after normalizing a leading `v` and
/// padding missing components); otherwise falls back to comparing numeric
/// segments left to right, so tags that are not quite semver still order
/// sensibly.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    match (parse_lenient_semver(left), parse_lenient_semver(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => compare_numeric_segments(left, right),
    }
}

fn parse_lenient_semver(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }
    let segments = trimmed.split('.').count();
    let padded = match segments {
        1 => format!("{trimmed}.0.0"),
        2 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).ok()
}

fn compare_numeric_segments(left: &str, right: &str) -> Ordering {
    let numbers = |s: &str| -> Vec<u64> {
        s.split(|c: char| !c.is_ascii_digit())
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| segment.parse().ok())
            .collect()
    };
    let left_numbers = numbers(left);
    let right_numbers = numbers(right);
    left_numbers
        .cmp(&right_numbers)
        .then_with(|| left.cmp(right))
}
