//! Artifact selection for a release against a platform filter.

use super::filter::PlatformFilter;
use super::types::{Release, ReleaseArtifact};

/// Rank assigned to values absent from a preference list; larger than any
/// real index so unmatched candidates sort last.
const UNMATCHED_RANK: usize = usize::MAX;

/// Picks the best artifact of `release` for `filter`, or `None` when no
/// artifact matches the filter's OS.
///
/// Candidates are restricted to the filter's OS (case-insensitive) with a
/// non-empty download link, then ordered by `(architecture rank, size rank)`
/// against the filter's preference lists. The sort is stable, so artifacts
/// tied on both ranks keep their feed order.
pub fn select<'a>(release: &'a Release, filter: &PlatformFilter) -> Option<&'a ReleaseArtifact> {
    let mut candidates: Vec<&ReleaseArtifact> = release
        .core_tools
        .iter()
        .filter(|artifact| {
            artifact
                .os
                .as_deref()
                .is_some_and(|os| os.eq_ignore_ascii_case(&filter.os))
                && artifact
                    .download_link
                    .as_deref()
                    .is_some_and(|link| !link.is_empty())
        })
        .collect();

    candidates.sort_by_key(|artifact| {
        (
            preference_rank(&filter.architectures, artifact.architecture.as_deref()),
            preference_rank(&filter.sizes, artifact.size.as_deref()),
        )
    });

    candidates.first().copied()
}

fn preference_rank(preferences: &[String], value: Option<&str>) -> usize {
    let Some(value) = value else {
        return UNMATCHED_RANK;
    };
    preferences
        .iter()
        .position(|preferred| preferred.eq_ignore_ascii_case(value))
        .unwrap_or(UNMATCHED_RANK)
}
