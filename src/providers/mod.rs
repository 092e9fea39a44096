//! Metadata provider clients.
//!
//! [`ProviderClient`] is the capability seam to one external metadata source:
//! search for candidate series, fetch series details, fetch cover art. One
//! implementation exists per [`ProviderIdentity`]; each is constructed from
//! provider-specific configuration plus the shared base HTTP client, and
//! every outbound call goes through the provider's own
//! [`ThroughputLimiter`](crate::ratelimit::ThroughputLimiter).

pub mod comicvine;
pub mod mangadex;

pub use comicvine::ComicVineClient;
pub use mangadex::MangaDexClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{ProviderIdentity, ProviderSeriesId};

/// A single candidate returned from a provider search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSearchResult {
    /// Human-facing URL of the result at the provider, if it has one.
    pub url: Option<String>,
    /// Cover thumbnail URL, if available.
    pub image_url: Option<String>,
    pub title: String,
    /// The provider that produced this result.
    pub provider: ProviderIdentity,
    /// Provider-scoped opaque id usable with
    /// [`ProviderClient::series`] and [`ProviderClient::cover`].
    pub result_id: ProviderSeriesId,
}

/// Full series details fetched from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSeriesMetadata {
    pub title: String,
    pub summary: Option<String>,
    pub publisher: Option<String>,
    pub release_year: Option<u16>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub cover_url: Option<String>,
}

/// Minimal percent-encoding for query-string values.
pub(crate) fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Client for one external metadata provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn identity(&self) -> ProviderIdentity;

    /// Search for series by name. No matches is an empty vec, not an error.
    async fn search(&self, name: &str) -> Result<Vec<SeriesSearchResult>>;

    /// Fetch full details for a provider-scoped series id.
    async fn series(&self, id: &ProviderSeriesId) -> Result<ProviderSeriesMetadata>;

    /// Fetch raw cover image bytes. `Ok(None)` when the series has no cover.
    async fn cover(&self, id: &ProviderSeriesId) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_spaces_and_reserved() {
        assert_eq!(urlencode("one punch man"), "one+punch+man");
        assert_eq!(urlencode("a&b"), "a%26b");
        assert_eq!(urlencode("safe-._~"), "safe-._~");
    }
}
