use clap::Parser;
use std::fs;
use tracing::{error, info, warn};

use funckit_core::{versions, CoreToolsManager};

#[derive(Parser, Debug, Clone)]
pub struct GetArgs {
    #[arg(value_name = "VERSION", help = "Functions runtime version, e.g. v4")]
    pub runtime_version: Option<String>,

    #[arg(
        long,
        value_name = "TFM",
        help = "Target framework used to pick a default version when VERSION is omitted, e.g. net8.0"
    )]
    pub framework: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct PruneArgs {
    #[arg(
        long,
        value_name = "COUNT",
        help = "Number of newest release folders to keep per version (defaults to the configured retention)"
    )]
    pub keep: Option<usize>,
}

pub async fn handle_get(manager: &CoreToolsManager, args: &GetArgs) -> i32 {
    let version = args.runtime_version.as_deref().unwrap_or("");
    match manager.get_or_download(version, args.framework.as_deref()).await {
        Some(path) => {
            println!("{}", path.display());
            0
        }
        None => {
            error!("No Core Tools available for the requested version");
            1
        }
    }
}

pub fn handle_list(manager: &CoreToolsManager) -> i32 {
    let root = &manager.settings().download_root;
    let Ok(entries) = fs::read_dir(root) else {
        info!("Nothing installed under {}", root.display());
        return 0;
    };

    let mut version_dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    version_dirs.sort();

    if version_dirs.is_empty() {
        info!("Nothing installed under {}", root.display());
        return 0;
    }

    for version_dir in version_dirs {
        let version = version_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("?");
        println!("{version}");
        for tag_dir in versions::tag_folders_newest_first(&version_dir) {
            if let Some(tag) = tag_dir.file_name().and_then(|name| name.to_str()) {
                println!("  {tag}");
            }
        }
    }
    0
}

pub async fn handle_update(manager: &CoreToolsManager) -> i32 {
    manager.update_all().await;
    0
}

pub fn handle_prune(manager: &CoreToolsManager, args: &PruneArgs) -> i32 {
    let retention = args.keep.unwrap_or(manager.settings().retention_count);
    let root = &manager.settings().download_root;
    let Ok(entries) = fs::read_dir(root) else {
        info!("Nothing to prune under {}", root.display());
        return 0;
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let version_dir = entry.path();
        if !version_dir.is_dir() {
            continue;
        }
        versions::prune_empty(&version_dir);
        versions::prune_excess(&version_dir, retention);
        if fs::read_dir(&version_dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            if let Err(err) = fs::remove_dir(&version_dir) {
                warn!("Unable to remove empty folder {}: {}", version_dir.display(), err);
            }
        }
    }
    info!("Prune finished, keeping up to {} release folders per version", retention);
    0
}
