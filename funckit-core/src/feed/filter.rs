//! Platform filter used to pick one artifact variant per release.
//!
//! The filter is derived once from the compiled target and stays fixed for
//! the process lifetime. Architecture and size lists are preference-ordered,
//! most preferred first.

/// OS, architecture and size preferences for artifact selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFilter {
    /// OS name as it appears in the feed (`Windows`, `MacOS`, `Linux`).
    pub os: String,
    /// Architecture preference order, most preferred first.
    pub architectures: Vec<String>,
    /// Size-variant preference order, most preferred first.
    pub sizes: Vec<String>,
}

impl PlatformFilter {
    pub fn new(
        os: impl Into<String>,
        architectures: &[&str],
        sizes: &[&str],
    ) -> Self {
        Self {
            os: os.into(),
            architectures: architectures.iter().map(|a| a.to_string()).collect(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Builds the filter for the running host.
    ///
    /// Windows prefers the minified distribution since the full one is only
    /// needed for extension bundles; macOS and Linux releases ship `full`
    /// only. ARM hosts fall back to x64 artifacts when no native build
    /// exists.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            if cfg!(target_arch = "aarch64") {
                Self::new("Windows", &["arm64", "x64"], &["minified", "full"])
            } else if cfg!(target_arch = "x86") {
                Self::new("Windows", &["x86"], &["minified", "full"])
            } else {
                Self::new("Windows", &["x64"], &["minified", "full"])
            }
        } else if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                Self::new("MacOS", &["arm64", "x64"], &["full"])
            } else {
                Self::new("MacOS", &["x64"], &["full"])
            }
        } else if cfg!(target_os = "linux") {
            Self::new("Linux", &["x64"], &["full"])
        } else {
            Self::new("Unknown", &["x64"], &["full"])
        }
    }
}
