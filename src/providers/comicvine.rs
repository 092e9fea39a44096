//! Comic Vine metadata provider client.
//!
//! Wraps the Comic Vine REST API (volume resources). Requires an API key;
//! the enforced upstream budget is small, so the default rate limit from
//! config matters here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::ids::{ProviderIdentity, ProviderSeriesId};
use crate::ratelimit::ThroughputLimiter;

use super::{ProviderClient, ProviderSeriesMetadata, SeriesSearchResult};

const COMICVINE_API: &str = "https://comicvine.gamespot.com/api";

#[derive(Debug, Deserialize)]
struct CvResponse<T> {
    results: T,
}

#[derive(Debug, Deserialize)]
struct CvVolume {
    id: i64,
    name: Option<String>,
    deck: Option<String>,
    description: Option<String>,
    start_year: Option<String>,
    site_detail_url: Option<String>,
    image: Option<CvImage>,
    publisher: Option<CvPublisher>,
}

#[derive(Debug, Deserialize)]
struct CvImage {
    medium_url: Option<String>,
    original_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CvPublisher {
    name: Option<String>,
}

pub struct ComicVineClient {
    client: reqwest::Client,
    api_key: String,
    limiter: Arc<ThroughputLimiter>,
    api_base: String,
}

impl ComicVineClient {
    /// Build from provider config and the shared base HTTP client.
    pub fn new(config: &ProviderConfig, base_client: reqwest::Client) -> Self {
        Self {
            client: base_client,
            api_key: config.api_key.clone().unwrap_or_default(),
            limiter: Arc::new(ThroughputLimiter::from_config(&config.rate_limit)),
            api_base: COMICVINE_API.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: "k".to_string(),
            limiter: Arc::new(ThroughputLimiter::from_config(&Default::default())),
            api_base: api_base.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.limiter.acquire().await;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), body));
        }
        Ok(resp.json().await?)
    }

    fn url(&self, path: &str, extra: &str) -> String {
        format!(
            "{}{path}?api_key={}&format=json{extra}",
            self.api_base, self.api_key
        )
    }
}

fn parse_year(start_year: Option<&str>) -> Option<u16> {
    start_year.and_then(|y| y.trim().parse().ok())
}

#[async_trait]
impl ProviderClient for ComicVineClient {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::ComicVine
    }

    async fn search(&self, name: &str) -> Result<Vec<SeriesSearchResult>> {
        let url = self.url(
            "/search/",
            &format!("&resources=volume&limit=20&query={}", super::urlencode(name)),
        );
        let found: CvResponse<Vec<CvVolume>> = self.get_json(&url).await?;
        debug!(query = name, hits = found.results.len(), "Comic Vine search");

        Ok(found
            .results
            .into_iter()
            .map(|volume| SeriesSearchResult {
                url: volume.site_detail_url.clone(),
                image_url: volume.image.as_ref().and_then(|i| i.medium_url.clone()),
                title: volume.name.clone().unwrap_or_default(),
                provider: ProviderIdentity::ComicVine,
                result_id: ProviderSeriesId::from(volume.id.to_string()),
            })
            .collect())
    }

    async fn series(&self, id: &ProviderSeriesId) -> Result<ProviderSeriesMetadata> {
        let url = self.url(&format!("/volume/4050-{id}/"), "");
        let entity: CvResponse<CvVolume> = self.get_json(&url).await?;
        let volume = entity.results;

        Ok(ProviderSeriesMetadata {
            title: volume.name.unwrap_or_default(),
            summary: volume.deck.or(volume.description),
            publisher: volume.publisher.and_then(|p| p.name),
            release_year: parse_year(volume.start_year.as_deref()),
            genres: Vec::new(),
            cover_url: volume.image.and_then(|i| i.original_url),
        })
    }

    async fn cover(&self, id: &ProviderSeriesId) -> Result<Option<Vec<u8>>> {
        let metadata = self.series(id).await?;
        let Some(cover_url) = metadata.cover_url else {
            return Ok(None);
        };

        self.limiter.acquire().await;
        let resp = self.client.get(&cover_url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::upstream(status.as_u16(), String::new()));
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}
