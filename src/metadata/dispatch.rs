//! Service resolution across backends.
//!
//! The [`MetadataServiceProvider`] answers "which backend's service handles
//! this library / series?" against the service graph's current generation.
//! Resolution is re-done per request, so a completed reconfiguration is
//! picked up by the very next call.

use std::sync::Arc;

use crate::backend::Series;
use crate::error::{Error, Result};
use crate::graph::{Generation, ServiceGraph};
use crate::ids::{LibraryId, ProviderIdentity, SeriesId};
use crate::metadata::MetadataService;

pub struct MetadataServiceProvider {
    graph: Arc<ServiceGraph>,
}

impl MetadataServiceProvider {
    pub fn new(graph: Arc<ServiceGraph>) -> Self {
        Self { graph }
    }

    /// The service of the backend that owns the given library.
    ///
    /// Explicit routing from config wins; otherwise each backend is probed
    /// for the library in configured order. No owner means the library id is
    /// unknown to every backend.
    pub async fn metadata_service_for(
        &self,
        library_id: &LibraryId,
    ) -> Result<Arc<MetadataService>> {
        service_for_library(&self.graph.current(), library_id).await
    }

    /// The service of the sole / first configured backend.
    pub fn default_metadata_service(&self) -> Result<Arc<MetadataService>> {
        self.graph
            .current()
            .default_backend()
            .map(|entry| Arc::clone(&entry.service))
            .ok_or(Error::NoBackendConfigured)
    }

    /// The service of the backend that knows the given series, along with
    /// the series record itself.
    pub async fn service_for_series(
        &self,
        series_id: &SeriesId,
    ) -> Result<(Arc<MetadataService>, Series)> {
        locate_series(&self.graph.current(), series_id).await
    }

    /// The library owning the given series. Used when a caller has only a
    /// series id.
    pub async fn library_for_series(&self, series_id: &SeriesId) -> Result<LibraryId> {
        let (_, series) = self.service_for_series(series_id).await?;
        Ok(series.library_id)
    }

    /// Provider identities available for the given library, in configured
    /// order.
    pub async fn available_providers(
        &self,
        library_id: &LibraryId,
    ) -> Result<Vec<ProviderIdentity>> {
        let service = self.metadata_service_for(library_id).await?;
        Ok(service.available_providers())
    }
}

async fn service_for_library(
    generation: &Generation,
    library_id: &LibraryId,
) -> Result<Arc<MetadataService>> {
    let mut any = false;
    for (_, entry) in generation.backends() {
        any = true;
        if entry.routes(library_id) {
            return Ok(Arc::clone(&entry.service));
        }
    }
    if !any {
        return Err(Error::NoBackendConfigured);
    }

    for (_, entry) in generation.backends() {
        if entry.client.get_library(library_id).await?.is_some() {
            return Ok(Arc::clone(&entry.service));
        }
    }

    Err(Error::UnknownLibrary(library_id.clone()))
}

/// Probe each backend for the series. A 404 means "not this backend"; any
/// other transport failure aborts resolution.
async fn locate_series(
    generation: &Generation,
    series_id: &SeriesId,
) -> Result<(Arc<MetadataService>, Series)> {
    let mut any = false;
    for (_, entry) in generation.backends() {
        any = true;
        match entry.client.get_series(series_id).await {
            Ok(series) => return Ok((Arc::clone(&entry.service), series)),
            Err(Error::Transport {
                status: Some(404), ..
            }) => continue,
            Err(e) => return Err(e),
        }
    }

    if !any {
        return Err(Error::NoBackendConfigured);
    }
    Err(Error::UnknownSeries(series_id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::backend::{Library, MediaServerClient, SeriesMetadataUpdate};
    use crate::config::ResetMode;
    use crate::db::init_memory_pool;
    use crate::graph::BackendEntry;
    use crate::ids::BackendKind;
    use crate::jobs::JobTracker;
    use crate::notify::NoopNotifier;

    /// Backend stub that owns a fixed set of libraries and series.
    struct StubBackend {
        kind: BackendKind,
        libraries: Vec<Library>,
        series: Vec<Series>,
    }

    #[async_trait]
    impl MediaServerClient for StubBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn get_series(&self, id: &SeriesId) -> Result<Series> {
            self.series
                .iter()
                .find(|s| &s.id == id)
                .cloned()
                .ok_or_else(|| Error::upstream(404, "not found"))
        }

        async fn get_library(&self, id: &LibraryId) -> Result<Option<Library>> {
            Ok(self.libraries.iter().find(|l| &l.id == id).cloned())
        }

        async fn get_libraries(&self) -> Result<Vec<Library>> {
            Ok(self.libraries.clone())
        }

        async fn get_series_in_library(&self, id: &LibraryId) -> Result<Vec<Series>> {
            Ok(self
                .series
                .iter()
                .filter(|s| &s.library_id == id)
                .cloned()
                .collect())
        }

        async fn update_series_metadata(
            &self,
            _id: &SeriesId,
            _update: &SeriesMetadataUpdate,
        ) -> Result<()> {
            Ok(())
        }

        async fn reset_series_metadata(
            &self,
            _id: &SeriesId,
            _remove_embedded: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn entry(kind: BackendKind, backend: StubBackend, routing: Vec<&str>) -> (BackendKind, BackendEntry) {
        let client: Arc<dyn MediaServerClient> = Arc::new(backend);
        let tracker = Arc::new(JobTracker::new(init_memory_pool().unwrap()));
        let service = MetadataService::new(
            Arc::clone(&client),
            Vec::new(),
            tracker,
            Arc::new(NoopNotifier),
            ResetMode::Sync,
        );
        let routing = routing.into_iter().map(LibraryId::from).collect();
        (kind, BackendEntry::stub(client, service, routing))
    }

    fn library(id: &str) -> Library {
        Library {
            id: LibraryId::from(id),
            name: id.to_string(),
        }
    }

    fn series(id: &str, library_id: &str) -> Series {
        Series {
            id: SeriesId::from(id),
            library_id: LibraryId::from(library_id),
            name: id.to_string(),
        }
    }

    #[tokio::test]
    async fn routing_list_wins_over_probing() {
        // lib-1 is owned by kavita on the wire, but explicitly routed to
        // komga in config.
        let generation = Generation::stub(vec![
            entry(
                BackendKind::Komga,
                StubBackend {
                    kind: BackendKind::Komga,
                    libraries: vec![],
                    series: vec![],
                },
                vec!["lib-1"],
            ),
            entry(
                BackendKind::Kavita,
                StubBackend {
                    kind: BackendKind::Kavita,
                    libraries: vec![library("lib-1")],
                    series: vec![],
                },
                vec![],
            ),
        ]);

        let service = service_for_library(&generation, &LibraryId::from("lib-1"))
            .await
            .unwrap();
        assert_eq!(service.backend().kind(), BackendKind::Komga);
    }

    #[tokio::test]
    async fn probing_finds_owning_backend() {
        let generation = Generation::stub(vec![
            entry(
                BackendKind::Komga,
                StubBackend {
                    kind: BackendKind::Komga,
                    libraries: vec![library("lib-a")],
                    series: vec![],
                },
                vec![],
            ),
            entry(
                BackendKind::Kavita,
                StubBackend {
                    kind: BackendKind::Kavita,
                    libraries: vec![library("lib-b")],
                    series: vec![],
                },
                vec![],
            ),
        ]);

        let service = service_for_library(&generation, &LibraryId::from("lib-b"))
            .await
            .unwrap();
        assert_eq!(service.backend().kind(), BackendKind::Kavita);
    }

    #[tokio::test]
    async fn unknown_library_when_no_backend_owns_it() {
        let generation = Generation::stub(vec![entry(
            BackendKind::Komga,
            StubBackend {
                kind: BackendKind::Komga,
                libraries: vec![library("lib-a")],
                series: vec![],
            },
            vec![],
        )]);

        let err = service_for_library(&generation, &LibraryId::from("lib-z"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownLibrary(id) if id.as_str() == "lib-z"));
    }

    #[tokio::test]
    async fn no_backend_configured() {
        let generation = Generation::stub(vec![]);
        let err = service_for_library(&generation, &LibraryId::from("lib-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoBackendConfigured));
    }

    #[tokio::test]
    async fn series_probe_skips_404_and_finds_owner() {
        let generation = Generation::stub(vec![
            entry(
                BackendKind::Komga,
                StubBackend {
                    kind: BackendKind::Komga,
                    libraries: vec![],
                    series: vec![],
                },
                vec![],
            ),
            entry(
                BackendKind::Kavita,
                StubBackend {
                    kind: BackendKind::Kavita,
                    libraries: vec![],
                    series: vec![series("s-9", "lib-b")],
                },
                vec![],
            ),
        ]);

        let (service, found) = locate_series(&generation, &SeriesId::from("s-9"))
            .await
            .unwrap();
        assert_eq!(service.backend().kind(), BackendKind::Kavita);
        assert_eq!(found.library_id.as_str(), "lib-b");
    }

    #[tokio::test]
    async fn series_unknown_everywhere() {
        let generation = Generation::stub(vec![entry(
            BackendKind::Komga,
            StubBackend {
                kind: BackendKind::Komga,
                libraries: vec![],
                series: vec![],
            },
            vec![],
        )]);

        let err = locate_series(&generation, &SeriesId::from("s-0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSeries(_)));
    }
}
