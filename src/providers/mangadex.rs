//! MangaDex metadata provider client.
//!
//! Wraps the MangaDex v5 REST API. Cover art requires a second lookup for
//! the cover filename, then a download from the uploads host.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::ids::{ProviderIdentity, ProviderSeriesId};
use crate::ratelimit::ThroughputLimiter;

use super::{ProviderClient, ProviderSeriesMetadata, SeriesSearchResult};

const MANGADEX_API: &str = "https://api.mangadex.org";
const MANGADEX_SITE: &str = "https://mangadex.org";
const MANGADEX_UPLOADS: &str = "https://uploads.mangadex.org";

#[derive(Debug, Deserialize)]
struct MdCollection<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MdEntity<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct MdManga {
    id: String,
    attributes: MdMangaAttributes,
    #[serde(default)]
    relationships: Vec<MdRelationship>,
}

#[derive(Debug, Deserialize)]
struct MdMangaAttributes {
    title: std::collections::HashMap<String, String>,
    #[serde(default)]
    description: std::collections::HashMap<String, String>,
    year: Option<u16>,
    #[serde(default)]
    tags: Vec<MdTag>,
}

#[derive(Debug, Deserialize)]
struct MdTag {
    attributes: MdTagAttributes,
}

#[derive(Debug, Deserialize)]
struct MdTagAttributes {
    name: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MdRelationship {
    #[serde(rename = "type")]
    kind: String,
    attributes: Option<MdRelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct MdRelationshipAttributes {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

fn preferred<'a>(map: &'a std::collections::HashMap<String, String>) -> Option<&'a String> {
    map.get("en").or_else(|| map.values().next())
}

impl MdManga {
    fn display_title(&self) -> String {
        preferred(&self.attributes.title)
            .cloned()
            .unwrap_or_default()
    }

    fn cover_file(&self) -> Option<&str> {
        self.relationships
            .iter()
            .filter(|r| r.kind == "cover_art")
            .find_map(|r| r.attributes.as_ref().and_then(|a| a.file_name.as_deref()))
    }
}

pub struct MangaDexClient {
    client: reqwest::Client,
    limiter: Arc<ThroughputLimiter>,
    api_base: String,
    uploads_base: String,
}

impl MangaDexClient {
    /// Build from provider config and the shared base HTTP client.
    pub fn new(config: &ProviderConfig, base_client: reqwest::Client) -> Self {
        Self {
            client: base_client,
            limiter: Arc::new(ThroughputLimiter::from_config(&config.rate_limit)),
            api_base: MANGADEX_API.to_string(),
            uploads_base: MANGADEX_UPLOADS.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_urls(api_base: &str, uploads_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            limiter: Arc::new(ThroughputLimiter::from_config(&Default::default())),
            api_base: api_base.to_string(),
            uploads_base: uploads_base.to_string(),
        }
    }

    /// Rate-limited GET returning the raw response.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.limiter.acquire().await;
        let resp = self.client.get(url).send().await?;
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.get(url).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(status.as_u16(), body));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ProviderClient for MangaDexClient {
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity::MangaDex
    }

    async fn search(&self, name: &str) -> Result<Vec<SeriesSearchResult>> {
        let url = format!(
            "{}/manga?title={}&limit=20&includes[]=cover_art",
            self.api_base,
            super::urlencode(name)
        );
        let found: MdCollection<MdManga> = self.get_json(&url).await?;
        debug!(query = name, hits = found.data.len(), "MangaDex search");

        Ok(found
            .data
            .into_iter()
            .map(|manga| {
                let image_url = manga.cover_file().map(|file| {
                    format!("{}/covers/{}/{file}.256.jpg", self.uploads_base, manga.id)
                });
                SeriesSearchResult {
                    url: Some(format!("{MANGADEX_SITE}/title/{}", manga.id)),
                    image_url,
                    title: manga.display_title(),
                    provider: ProviderIdentity::MangaDex,
                    result_id: ProviderSeriesId::from(manga.id),
                }
            })
            .collect())
    }

    async fn series(&self, id: &ProviderSeriesId) -> Result<ProviderSeriesMetadata> {
        let url = format!("{}/manga/{id}?includes[]=cover_art", self.api_base);
        let entity: MdEntity<MdManga> = self.get_json(&url).await?;
        let manga = entity.data;

        let cover_url = manga
            .cover_file()
            .map(|file| format!("{}/covers/{}/{file}", self.uploads_base, manga.id));

        Ok(ProviderSeriesMetadata {
            title: manga.display_title(),
            summary: preferred(&manga.attributes.description).cloned(),
            publisher: None,
            release_year: manga.attributes.year,
            genres: manga
                .attributes
                .tags
                .iter()
                .filter_map(|t| preferred(&t.attributes.name).cloned())
                .collect(),
            cover_url,
        })
    }

    async fn cover(&self, id: &ProviderSeriesId) -> Result<Option<Vec<u8>>> {
        let metadata = self.series(id).await?;
        let Some(cover_url) = metadata.cover_url else {
            return Ok(None);
        };

        let resp = self.get(&cover_url).await?;
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
