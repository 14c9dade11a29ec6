//! HTTP client for the Core Tools release feed.
//!
//! Fetches the feed document and decodes it leniently: unknown keys are
//! ignored, absent fields fall back to their defaults, and trailing commas
//! are stripped before decoding since the published feed has carried them in
//! the past. Retry policy belongs to the caller; a failed fetch leaves no
//! state behind.

use thiserror::Error;
use tracing::debug;

use super::types::ReleaseFeed;

/// Failure fetching or decoding the release feed. Recoverable by calling
/// again; nothing is cached on failure.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to fetch release feed from {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("release feed request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode release feed")]
    Decode(#[from] serde_json::Error),
}

/// Fetches and decodes release feed documents.
#[derive(Debug, Clone, Default)]
pub struct FeedClient {
    http: reqwest::Client,
}

impl FeedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downloads and decodes the feed at `feed_url`.
    pub async fn fetch(&self, feed_url: &str) -> Result<ReleaseFeed, FeedError> {
        debug!("Fetching release feed from {}", feed_url);

        let response = self
            .http
            .get(feed_url)
            .send()
            .await
            .map_err(|source| FeedError::Http {
                url: feed_url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: feed_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FeedError::Http {
            url: feed_url.to_string(),
            source,
        })?;

        let feed = parse_feed(&body)?;
        debug!(
            "Release feed decoded: {} tags, {} releases",
            feed.tags.len(),
            feed.releases.len()
        );
        Ok(feed)
    }
}

/// Decodes a feed document from its JSON text.
pub fn parse_feed(body: &str) -> Result<ReleaseFeed, FeedError> {
    Ok(serde_json::from_str(&strip_trailing_commas(body))?)
}

/// Removes commas that directly precede a closing `}` or `]`, outside of
/// string literals. `serde_json` is strict about trailing commas but the
/// feed is not.
///
/// Only ASCII commas are dropped; everything between them is copied as
/// whole spans, so multi-byte characters pass through untouched.
fn strip_trailing_commas(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = String::with_capacity(input.len());
    // Start of the span not yet copied to the output.
    let mut copied = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];

        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            index += 1;
            continue;
        }

        match byte {
            b'"' => {
                in_string = true;
                index += 1;
            }
            b',' => {
                // Look past whitespace; drop the comma when a close follows.
                let mut ahead = index + 1;
                while ahead < bytes.len() && bytes[ahead].is_ascii_whitespace() {
                    ahead += 1;
                }
                if ahead < bytes.len() && (bytes[ahead] == b'}' || bytes[ahead] == b']') {
                    // Both offsets sit on ASCII bytes, so the slice is
                    // always on a character boundary.
                    output.push_str(&input[copied..index]);
                    copied = index + 1;
                }
                index += 1;
            }
            _ => index += 1,
        }
    }

    output.push_str(&input[copied..]);
    output
}
