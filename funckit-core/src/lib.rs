//! Core library for funckit: resolving, downloading, and managing local
//! installations of the Azure Functions Core Tools.
//!
//! The entry point for most callers is [`manager::CoreToolsManager`], which
//! layers a persistent on-disk cache, a lazily-fetched release feed, and an
//! idempotent download pipeline behind a small async API.

pub mod archive;
pub mod cache;
pub mod download;
pub mod feed;
pub mod manager;
pub mod settings;
pub mod versions;

pub use cache::{ResolvedRelease, ToolingCache};
pub use download::{DownloadError, Downloader};
pub use feed::{FeedClient, FeedError, PlatformFilter, ReleaseFeed};
pub use manager::CoreToolsManager;
pub use settings::{load_settings, save_settings, ToolPathEntry, ToolingSettings};

/// Crate version, for CLI banners and logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
