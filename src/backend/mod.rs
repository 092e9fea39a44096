//! Media-server backend clients.
//!
//! [`MediaServerClient`] is the capability seam to one external media-server
//! instance: fetch series and libraries, write series metadata, reset it.
//! One implementation exists per [`BackendKind`]; each is constructed from
//! backend-specific configuration plus the shared base HTTP client.

pub mod kavita;
pub mod komga;

pub use kavita::KavitaClient;
pub use komga::KomgaClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{BackendKind, LibraryId, SeriesId};

/// A series as known to the owning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: SeriesId,
    pub library_id: LibraryId,
    pub name: String,
}

/// A library as known to the owning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
}

/// Metadata fields written back to a backend series record. Unset fields are
/// left untouched by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesMetadataUpdate {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub publisher: Option<String>,
    pub release_year: Option<u16>,
    #[serde(default)]
    pub genres: Vec<String>,
    /// Absolute URL of a cover image to apply, when the provider had one.
    pub cover_url: Option<String>,
}

/// Client for one media-server backend instance.
#[async_trait]
pub trait MediaServerClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get_series(&self, id: &SeriesId) -> Result<Series>;

    /// `Ok(None)` when this backend does not own the library.
    async fn get_library(&self, id: &LibraryId) -> Result<Option<Library>>;

    async fn get_libraries(&self) -> Result<Vec<Library>>;

    async fn get_series_in_library(&self, id: &LibraryId) -> Result<Vec<Series>>;

    async fn update_series_metadata(
        &self,
        id: &SeriesId,
        update: &SeriesMetadataUpdate,
    ) -> Result<()>;

    /// Reset series metadata to backend defaults; when `remove_embedded` is
    /// set, also strip metadata embedded in the content files. Malformed
    /// embedded metadata surfaces as
    /// [`Error::MalformedEmbeddedMetadata`](crate::error::Error).
    async fn reset_series_metadata(&self, id: &SeriesId, remove_embedded: bool) -> Result<()>;
}

/// Map a non-success backend response to the error taxonomy. HTTP 422 from a
/// metadata write means the embedded metadata could not be parsed or
/// rewritten, a distinct failure class from transport errors.
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
        return Err(Error::malformed_embedded(body));
    }
    Err(Error::upstream(status.as_u16(), body))
}
