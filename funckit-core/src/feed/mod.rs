//! Release feed access: wire types, lenient fetching, and artifact
//! selection against the host platform.

pub mod client;
pub mod filter;
pub mod selector;
pub mod types;

pub use client::{parse_feed, FeedClient, FeedError};
pub use filter::PlatformFilter;
pub use selector::select;
pub use types::{Release, ReleaseArtifact, ReleaseFeed, Tag};
