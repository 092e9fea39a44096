//! Kavita-like backend client.
//!
//! Authenticates with a bearer token obtained from the configured API key.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::ids::{BackendKind, LibraryId, SeriesId};

use super::{check_response, Library, MediaServerClient, Series, SeriesMetadataUpdate};

#[derive(Debug, Deserialize)]
struct KavitaSeries {
    id: i64,
    #[serde(rename = "libraryId")]
    library_id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct KavitaLibrary {
    id: i64,
    name: String,
}

pub struct KavitaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl KavitaClient {
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
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl MediaServerClient for KavitaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Kavita
    }

    async fn get_series(&self, id: &SeriesId) -> Result<Series> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/api/series/{id}"))
            .send()
            .await?;
        let series: KavitaSeries = check_response(resp).await?.json().await?;
        Ok(Series {
            id: series.id.to_string().into(),
            library_id: series.library_id.to_string().into(),
            name: series.name,
        })
    }

    async fn get_library(&self, id: &LibraryId) -> Result<Option<Library>> {
        // Kavita has no single-library endpoint; filter the list.
        Ok(self
            .get_libraries()
            .await?
            .into_iter()
            .find(|l| l.id == *id))
    }

    async fn get_libraries(&self) -> Result<Vec<Library>> {
        let resp = self
            .request(reqwest::Method::GET, "/api/library/libraries")
            .send()
            .await?;
        let libraries: Vec<KavitaLibrary> = check_response(resp).await?.json().await?;
        Ok(libraries
            .into_iter()
            .map(|l| Library {
                id: l.id.to_string().into(),
                name: l.name,
            })
            .collect())
    }

    async fn get_series_in_library(&self, id: &LibraryId) -> Result<Vec<Series>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/api/series/all?libraryId={id}"),
            )
            .send()
            .await?;
        let series: Vec<KavitaSeries> = check_response(resp).await?.json().await?;
        Ok(series
            .into_iter()
            .map(|s| Series {
                id: s.id.to_string().into(),
                library_id: s.library_id.to_string().into(),
                name: s.name,
            })
            .collect())
    }

    async fn update_series_metadata(
        &self,
        id: &SeriesId,
        update: &SeriesMetadataUpdate,
    ) -> Result<()> {
        debug!(series_id = %id, "Writing series metadata to kavita");
        let body = json!({
            "seriesId": id.as_str(),
            "localizedName": update.title,
            "summary": update.summary,
            "publisher": update.publisher,
            "releaseYear": update.release_year,
            "genres": update.genres,
        });
        let resp = self
            .request(reqwest::Method::POST, "/api/series/metadata")
            .json(&body)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    async fn reset_series_metadata(&self, id: &SeriesId, remove_embedded: bool) -> Result<()> {
        debug!(series_id = %id, remove_embedded, "Resetting series metadata on kavita");
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/api/series/metadata/reset?seriesId={id}&removeEmbedded={remove_embedded}"),
            )
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}
