//! Wire types for the Core Tools release feed.
//!
//! The feed is a third-party JSON document that evolves independently of this
//! crate, so every field is optional or defaulted and unknown keys are
//! ignored. The document maps runtime-version tags (`v4`, `v3`, ...) to
//! release pointers, and release ids to per-platform artifact lists.

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level release feed document.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFeed {
    /// Runtime-version tags, e.g. `"v4"` -> pointer into `releases`.
    #[serde(default)]
    pub tags: HashMap<String, Tag>,
    /// Concrete releases keyed by release id, e.g. `"4.0.5198"`.
    #[serde(default)]
    pub releases: HashMap<String, Release>,
}

/// A runtime-version tag pointing at a concrete release.
#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    /// Release id this tag currently points at.
    pub release: Option<String>,
    #[serde(rename = "releaseQuality")]
    pub release_quality: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl Tag {
    /// A tag participates in resolution only when it points at a release,
    /// carries a release quality, and is not hidden.
    pub fn is_usable(&self) -> bool {
        !self.hidden
            && self.release.as_deref().is_some_and(|r| !r.is_empty())
            && self
                .release_quality
                .as_deref()
                .is_some_and(|q| !q.is_empty())
    }
}

/// A concrete tooling release with its per-platform artifacts.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub templates: Option<String>,
    /// Artifact variants in feed order; order matters for tie-breaking.
    #[serde(rename = "coreTools", default)]
    pub core_tools: Vec<ReleaseArtifact>,
}

/// One downloadable Core Tools variant (OS x architecture x size).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseArtifact {
    #[serde(rename = "OS")]
    pub os: Option<String>,
    #[serde(rename = "Architecture")]
    pub architecture: Option<String>,
    #[serde(rename = "downloadLink")]
    pub download_link: Option<String>,
    /// SHA-256 of the artifact, lowercase hex, when published.
    pub sha2: Option<String>,
    /// Distribution size variant, e.g. `"minified"` or `"full"`.
    pub size: Option<String>,
    #[serde(default)]
    pub default: bool,
}
