//! Process-scoped cache of resolved tooling releases.
//!
//! The feed is fetched at most once per process while the cache holds
//! entries; resolution walks the feed's visible tags in sorted order and
//! memoizes one [`ResolvedRelease`] per runtime version. Entries are only
//! ever inserted, never updated or removed, since the feed is assumed stable
//! for a process run. A failed fetch leaves the cache empty so the next call
//! retries.

use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::feed::{select, FeedClient, FeedError, PlatformFilter, ReleaseFeed};

/// A runtime version resolved to a concrete release artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    /// Lowercased runtime-version tag, e.g. `v4`.
    pub runtime_version: String,
    /// Release tag the runtime version currently points at, e.g. `4.0.5198`.
    pub release_tag: String,
    /// Download URL of the selected artifact.
    pub artifact_url: String,
    /// Published SHA-256 of the artifact, when present in the feed.
    pub sha2: Option<String>,
}

/// Memoized runtime-version -> release resolution backed by the feed.
pub struct ToolingCache {
    client: FeedClient,
    feed_url: String,
    filter: PlatformFilter,
    releases: RwLock<HashMap<String, ResolvedRelease>>,
    /// Serializes the one-time feed fetch across concurrent callers.
    load_lock: Mutex<()>,
}

impl ToolingCache {
    pub fn new(feed_url: impl Into<String>, filter: PlatformFilter) -> Self {
        Self {
            client: FeedClient::new(),
            feed_url: feed_url.into(),
            filter,
            releases: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Fetches the feed and fills the cache unless it is already populated.
    ///
    /// Safe to call from any number of tasks: the emptiness check is
    /// repeated under the load lock, so the feed is fetched at most once
    /// while entries remain cached.
    pub async fn ensure_loaded(&self) -> Result<(), FeedError> {
        if !self.releases.read().await.is_empty() {
            return Ok(());
        }

        let _guard = self.load_lock.lock().await;
        if !self.releases.read().await.is_empty() {
            return Ok(());
        }

        let feed = self.client.fetch(&self.feed_url).await?;
        let resolved = resolve_feed(&feed, &self.filter);

        let mut releases = self.releases.write().await;
        for (key, release) in resolved {
            releases.entry(key).or_insert(release);
        }
        Ok(())
    }

    /// Looks up the resolved release for a runtime version. Case-insensitive
    /// on the version string; returns `None` for versions the feed does not
    /// expose (or before [`ensure_loaded`](Self::ensure_loaded) succeeded).
    pub async fn resolve(&self, runtime_version: &str) -> Option<ResolvedRelease> {
        self.releases
            .read()
            .await
            .get(&runtime_version.to_lowercase())
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn with_releases(
        feed_url: &str,
        filter: PlatformFilter,
        entries: Vec<ResolvedRelease>,
    ) -> Self {
        let mut cache = Self::new(feed_url, filter);
        let mut map = HashMap::new();
        for entry in entries {
            map.insert(entry.runtime_version.clone(), entry);
        }
        *cache.releases.get_mut() = map;
        cache
    }
}

/// Resolves every usable tag of `feed` to its artifact for `filter`.
///
/// Tags are visited in sorted key order; tags without a usable release
/// pointer, unknown release ids, and releases with no matching artifact are
/// skipped. Keys are lowercased tag names.
fn resolve_feed(feed: &ReleaseFeed, filter: &PlatformFilter) -> Vec<(String, ResolvedRelease)> {
    let mut tag_names: Vec<&String> = feed.tags.keys().collect();
    tag_names.sort();

    let mut resolved = Vec::new();
    for name in tag_names {
        let tag = &feed.tags[name];
        if !tag.is_usable() {
            continue;
        }
        let Some(release_id) = tag.release.as_deref() else {
            continue;
        };
        let Some(release) = feed.releases.get(release_id) else {
            continue;
        };
        let Some(artifact) = select(release, filter) else {
            continue;
        };
        let Some(artifact_url) = artifact.download_link.clone() else {
            continue;
        };

        let key = name.to_lowercase();
        debug!(
            "Resolved runtime version {} to release {} ({})",
            key, release_id, artifact_url
        );
        resolved.push((
            key.clone(),
            ResolvedRelease {
                runtime_version: key,
                release_tag: release_id.to_string(),
                artifact_url,
                sha2: artifact.sha2.clone(),
            },
        ));
    }
    resolved
}
