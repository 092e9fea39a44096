//! Komga-like backend client.
//!
//! Authenticates with an `X-API-Key` header against the v1 REST API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::ids::{BackendKind, LibraryId, SeriesId};

use super::{check_response, Library, MediaServerClient, Series, SeriesMetadataUpdate};

#[derive(Debug, Deserialize)]
struct KomgaSeries {
    id: String,
    #[serde(rename = "libraryId")]
    library_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct KomgaLibrary {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct KomgaPage<T> {
    content: Vec<T>,
}

pub struct KomgaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl KomgaClient {
    /// Build from backend config and the shared base HTTP client.
    pub fn new(config: &BackendConfig, base_client: reqwest::Client) -> Self {
        Self {
            client: base_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-API-Key", &self.api_key)
    }
}

#[async_trait]
impl MediaServerClient for KomgaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Komga
    }

    async fn get_series(&self, id: &SeriesId) -> Result<Series> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/v1/series/{id}"))
            .send()
            .await?;
        let series: KomgaSeries = check_response(resp).await?.json().await?;
        Ok(Series {
            id: series.id.into(),
            library_id: series.library_id.into(),
            name: series.name,
        })
    }

    async fn get_library(&self, id: &LibraryId) -> Result<Option<Library>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/v1/libraries/{id}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let library: KomgaLibrary = check_response(resp).await?.json().await?;
        Ok(Some(Library {
            id: library.id.into(),
            name: library.name,
        }))
    }

    async fn get_libraries(&self) -> Result<Vec<Library>> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/libraries")
            .send()
            .await?;
        let libraries: Vec<KomgaLibrary> = check_response(resp).await?.json().await?;
        Ok(libraries
            .into_iter()
            .map(|l| Library {
                id: l.id.into(),
                name: l.name,
            })
            .collect())
    }

    async fn get_series_in_library(&self, id: &LibraryId) -> Result<Vec<Series>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/series?library_id={id}&unpaged=true"),
            )
            .send()
            .await?;
        let page: KomgaPage<KomgaSeries> = check_response(resp).await?.json().await?;
        Ok(page
            .content
            .into_iter()
            .map(|s| Series {
                id: s.id.into(),
                library_id: s.library_id.into(),
                name: s.name,
            })
            .collect())
    }

    async fn update_series_metadata(
        &self,
        id: &SeriesId,
        update: &SeriesMetadataUpdate,
    ) -> Result<()> {
        debug!(series_id = %id, "Writing series metadata to komga");
        let body = json!({
            "title": update.title,
            "summary": update.summary,
            "publisher": update.publisher,
            "releaseYear": update.release_year,
            "genres": update.genres,
        });
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/api/v1/series/{id}/metadata"),
            )
            .json(&body)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    async fn reset_series_metadata(&self, id: &SeriesId, remove_embedded: bool) -> Result<()> {
        debug!(series_id = %id, remove_embedded, "Resetting series metadata on komga");
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/series/{id}/metadata/reset?removeEmbedded={remove_embedded}"),
            )
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}
