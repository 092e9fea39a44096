//! Backend-specific metadata operations.
//!
//! One [`MetadataService`] exists per configured backend per generation. It
//! answers search and cover queries synchronously and dispatches identify,
//! match and reset operations as tracked background jobs: the job is created
//! Pending, submitted to the service's worker queue, and the caller gets the
//! [`JobId`] immediately. The worker transitions the job to Running, executes
//! the provider lookup and backend write, finishes in Completed or Failed,
//! and fires a notification event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backend::{MediaServerClient, SeriesMetadataUpdate};
use crate::config::ResetMode;
use crate::error::{Error, Result};
use crate::ids::{JobId, LibraryId, ProviderIdentity, ProviderSeriesId, SeriesId};
use crate::jobs::{JobKind, JobTracker};
use crate::notify::{NotificationEvent, NotificationService};
use crate::providers::{ProviderClient, ProviderSeriesMetadata, SeriesSearchResult};

/// Channel capacity for the background job queue.
const QUEUE_CAPACITY: usize = 64;

impl From<ProviderSeriesMetadata> for SeriesMetadataUpdate {
    fn from(metadata: ProviderSeriesMetadata) -> Self {
        Self {
            title: Some(metadata.title),
            summary: metadata.summary,
            publisher: metadata.publisher,
            release_year: metadata.release_year,
            genres: metadata.genres,
            cover_url: metadata.cover_url,
        }
    }
}

/// Work item handed to the background worker.
#[derive(Debug, Clone)]
enum JobTask {
    Identify {
        series_id: SeriesId,
        provider: ProviderIdentity,
        provider_series_id: ProviderSeriesId,
    },
    MatchSeries {
        series_id: SeriesId,
    },
    MatchLibrary {
        library_id: LibraryId,
    },
    ResetSeries {
        series_id: SeriesId,
        remove_embedded: bool,
    },
    ResetLibrary {
        library_id: LibraryId,
        remove_embedded: bool,
    },
}

struct WorkItem {
    job_id: JobId,
    task: JobTask,
}

pub struct MetadataService {
    backend: Arc<dyn MediaServerClient>,
    providers: Vec<Arc<dyn ProviderClient>>,
    tracker: Arc<JobTracker>,
    reset_mode: ResetMode,
    worker_tx: mpsc::Sender<WorkItem>,
    retired: AtomicBool,
}

impl std::fmt::Debug for MetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataService")
            .field("reset_mode", &self.reset_mode)
            .field("retired", &self.retired)
            .finish_non_exhaustive()
    }
}

impl MetadataService {
    /// Create the service and spawn its background worker task.
    ///
    /// The worker runs until the service (and with it the queue sender) is
    /// dropped, at which point it drains remaining items and exits, so work
    /// already dispatched against a superseded generation still completes.
    pub fn new(
        backend: Arc<dyn MediaServerClient>,
        providers: Vec<Arc<dyn ProviderClient>>,
        tracker: Arc<JobTracker>,
        notifier: Arc<dyn NotificationService>,
        reset_mode: ResetMode,
    ) -> Arc<Self> {
        let (worker_tx, worker_rx) = mpsc::channel(QUEUE_CAPACITY);

        let worker = Worker {
            backend: Arc::clone(&backend),
            providers: providers.clone(),
            tracker: Arc::clone(&tracker),
            notifier,
        };
        tokio::spawn(worker.run(worker_rx));

        Arc::new(Self {
            backend,
            providers,
            tracker,
            reset_mode,
            worker_tx,
            retired: AtomicBool::new(false),
        })
    }

    /// Mark this service as belonging to a retired generation. New job
    /// submissions are rejected; in-flight work drains.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn backend(&self) -> &Arc<dyn MediaServerClient> {
        &self.backend
    }

    /// Provider identities enabled for this backend, in configured order.
    pub fn available_providers(&self) -> Vec<ProviderIdentity> {
        self.providers.iter().map(|p| p.identity()).collect()
    }

    /// Query the configured providers for candidate series, in provider
    /// order. A failing provider is logged and skipped so the others still
    /// contribute; no matches is an empty vec, not an error.
    pub async fn search_series(&self, name: &str) -> Result<Vec<SeriesSearchResult>> {
        let mut results = Vec::new();
        for provider in &self.providers {
            match provider.search(name).await {
                Ok(found) => results.extend(found),
                Err(e) => {
                    warn!(provider = %provider.identity(), error = %e, "Provider search failed; skipping");
                }
            }
        }
        Ok(results)
    }

    /// Fetch raw cover bytes from one provider. `Ok(None)` for a legitimate
    /// missing cover.
    pub async fn series_cover(
        &self,
        provider: ProviderIdentity,
        provider_series_id: &ProviderSeriesId,
    ) -> Result<Option<Vec<u8>>> {
        self.provider(provider)?.cover(provider_series_id).await
    }

    /// Write metadata from an explicitly chosen provider result to the
    /// backend, as a background job.
    pub async fn identify_series(
        &self,
        series_id: SeriesId,
        provider: ProviderIdentity,
        provider_series_id: ProviderSeriesId,
    ) -> Result<JobId> {
        // Validate the provider before allocating a job.
        self.provider(provider)?;
        self.submit(
            JobKind::IdentifySeries,
            None,
            Some(series_id.clone()),
            JobTask::Identify {
                series_id,
                provider,
                provider_series_id,
            },
        )
        .await
    }

    /// Match a series against the configured providers and write the best
    /// hit's metadata, as a background job.
    pub async fn match_series(&self, series_id: SeriesId) -> Result<JobId> {
        self.submit(
            JobKind::MatchSeries,
            None,
            Some(series_id.clone()),
            JobTask::MatchSeries { series_id },
        )
        .await
    }

    /// Match every series in a library, as a background job.
    pub async fn match_library(&self, library_id: LibraryId) -> Result<JobId> {
        self.submit(
            JobKind::MatchLibrary,
            Some(library_id.clone()),
            None,
            JobTask::MatchLibrary { library_id },
        )
        .await
    }

    /// Reset series metadata to backend defaults. Runs inline or as a job
    /// depending on the backend's configured reset mode; inline resets
    /// return `Ok(None)` and surface errors (including the distinct
    /// malformed-embedded-metadata class) directly.
    pub async fn reset_series(
        &self,
        series_id: SeriesId,
        remove_embedded: bool,
    ) -> Result<Option<JobId>> {
        match self.reset_mode {
            ResetMode::Sync => {
                self.backend
                    .reset_series_metadata(&series_id, remove_embedded)
                    .await?;
                Ok(None)
            }
            ResetMode::Async => self
                .submit(
                    JobKind::ResetSeries,
                    None,
                    Some(series_id.clone()),
                    JobTask::ResetSeries {
                        series_id,
                        remove_embedded,
                    },
                )
                .await
                .map(Some),
        }
    }

    /// Reset metadata for every series in a library. Mode selection as in
    /// [`reset_series`](Self::reset_series).
    pub async fn reset_library(
        &self,
        library_id: LibraryId,
        remove_embedded: bool,
    ) -> Result<Option<JobId>> {
        match self.reset_mode {
            ResetMode::Sync => {
                let series = self.backend.get_series_in_library(&library_id).await?;
                for s in &series {
                    self.backend
                        .reset_series_metadata(&s.id, remove_embedded)
                        .await?;
                }
                Ok(None)
            }
            ResetMode::Async => self
                .submit(
                    JobKind::ResetLibrary,
                    Some(library_id.clone()),
                    None,
                    JobTask::ResetLibrary {
                        library_id,
                        remove_embedded,
                    },
                )
                .await
                .map(Some),
        }
    }

    fn provider(&self, identity: ProviderIdentity) -> Result<&Arc<dyn ProviderClient>> {
        self.providers
            .iter()
            .find(|p| p.identity() == identity)
            .ok_or_else(|| Error::UnknownProvider(identity.to_string()))
    }

    /// Allocate a Pending job, persist it, and hand the task to the worker.
    /// The repository write happens before the JobId is returned.
    async fn submit(
        &self,
        kind: JobKind,
        library_id: Option<LibraryId>,
        series_id: Option<SeriesId>,
        task: JobTask,
    ) -> Result<JobId> {
        if self.retired.load(Ordering::SeqCst) {
            return Err(Error::GenerationRetired);
        }

        let job = self.tracker.create(kind, library_id, series_id)?;
        info!(job_id = %job.id, kind = %kind, "Dispatching metadata job");

        let item = WorkItem {
            job_id: job.id,
            task,
        };
        if self.worker_tx.send(item).await.is_err() {
            self.tracker
                .mark_failed(job.id, "Job queue is closed")?;
            return Err(Error::GenerationRetired);
        }

        Ok(job.id)
    }
}

/// Background loop that drains the job queue, executes each operation, and
/// records the outcome on the job record.
struct Worker {
    backend: Arc<dyn MediaServerClient>,
    providers: Vec<Arc<dyn ProviderClient>>,
    tracker: Arc<JobTracker>,
    notifier: Arc<dyn NotificationService>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<WorkItem>) {
        info!(backend = %self.backend.kind(), "Metadata job worker started");

        while let Some(item) = rx.recv().await {
            let job_id = item.job_id;
            if let Err(e) = self.tracker.mark_running(job_id) {
                warn!(job_id = %job_id, error = %e, "Failed to mark job running");
            }

            let outcome = self.execute(&item.task).await;
            let transition = match &outcome {
                Ok(()) => self.tracker.mark_completed(job_id),
                Err(e) => self.tracker.mark_failed(job_id, &e.to_string()),
            };
            if let Err(e) = transition {
                warn!(job_id = %job_id, error = %e, "Failed to record job outcome");
            }

            match self.tracker.get(job_id) {
                Ok(Some(job)) => {
                    if let Some(event) = NotificationEvent::from_job(&job) {
                        self.notifier.notify(event).await;
                    }
                }
                Ok(None) => warn!(job_id = %job_id, "Finished job missing from tracker"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to load finished job"),
            }
        }

        info!(backend = %self.backend.kind(), "Metadata job worker stopped (queue closed)");
    }

    async fn execute(&self, task: &JobTask) -> Result<()> {
        match task {
            JobTask::Identify {
                series_id,
                provider,
                provider_series_id,
            } => {
                let client = self.provider(*provider)?;
                let metadata = client.series(provider_series_id).await?;
                self.backend
                    .update_series_metadata(series_id, &metadata.into())
                    .await
            }
            JobTask::MatchSeries { series_id } => self.match_one(series_id).await,
            JobTask::MatchLibrary { library_id } => {
                let series = self.backend.get_series_in_library(library_id).await?;
                let total = series.len();
                let mut failed = 0usize;
                for s in &series {
                    if let Err(e) = self.match_one(&s.id).await {
                        warn!(series_id = %s.id, error = %e, "Series match failed during library match");
                        failed += 1;
                    }
                }
                info!(library_id = %library_id, total, failed, "Library match finished");
                if failed == total && total > 0 {
                    return Err(Error::NoMatch(format!(
                        "All {total} series in library {library_id} failed to match"
                    )));
                }
                Ok(())
            }
            JobTask::ResetSeries {
                series_id,
                remove_embedded,
            } => {
                self.backend
                    .reset_series_metadata(series_id, *remove_embedded)
                    .await
            }
            JobTask::ResetLibrary {
                library_id,
                remove_embedded,
            } => {
                let series = self.backend.get_series_in_library(library_id).await?;
                for s in &series {
                    self.backend
                        .reset_series_metadata(&s.id, *remove_embedded)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Search providers in configured order and write the first hit.
    async fn match_one(&self, series_id: &SeriesId) -> Result<()> {
        let series = self.backend.get_series(series_id).await?;

        for provider in &self.providers {
            let results = match provider.search(&series.name).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(provider = %provider.identity(), error = %e, "Provider search failed; trying next");
                    continue;
                }
            };
            let Some(hit) = results.into_iter().next() else {
                continue;
            };

            let metadata = provider.series(&hit.result_id).await?;
            return self
                .backend
                .update_series_metadata(series_id, &metadata.into())
                .await;
        }

        Err(Error::NoMatch(format!(
            "No provider returned a match for series '{}'",
            series.name
        )))
    }

    fn provider(&self, identity: ProviderIdentity) -> Result<&Arc<dyn ProviderClient>> {
        self.providers
            .iter()
            .find(|p| p.identity() == identity)
            .ok_or_else(|| Error::UnknownProvider(identity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    use crate::backend::{Library, Series};
    use crate::db::init_memory_pool;
    use crate::ids::BackendKind;
    use crate::jobs::{Job, JobStatus};
    use crate::notify::NoopNotifier;

    #[derive(Default)]
    struct StubBackend {
        series: Vec<Series>,
        /// When set, every metadata write fails with this message as a
        /// malformed-embedded-metadata error.
        malformed: Option<String>,
        updates: Mutex<Vec<(SeriesId, SeriesMetadataUpdate)>>,
        resets: Mutex<Vec<(SeriesId, bool)>>,
    }

    #[async_trait]
    impl MediaServerClient for StubBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Komga
        }

        async fn get_series(&self, id: &SeriesId) -> crate::error::Result<Series> {
            self.series
                .iter()
                .find(|s| &s.id == id)
                .cloned()
                .ok_or_else(|| Error::upstream(404, "not found"))
        }

        async fn get_library(&self, _id: &LibraryId) -> crate::error::Result<Option<Library>> {
            Ok(None)
        }

        async fn get_libraries(&self) -> crate::error::Result<Vec<Library>> {
            Ok(Vec::new())
        }

        async fn get_series_in_library(
            &self,
            id: &LibraryId,
        ) -> crate::error::Result<Vec<Series>> {
            Ok(self
                .series
                .iter()
                .filter(|s| &s.library_id == id)
                .cloned()
                .collect())
        }

        async fn update_series_metadata(
            &self,
            id: &SeriesId,
            update: &SeriesMetadataUpdate,
        ) -> crate::error::Result<()> {
            if let Some(msg) = &self.malformed {
                return Err(Error::malformed_embedded(msg.clone()));
            }
            self.updates.lock().push((id.clone(), update.clone()));
            Ok(())
        }

        async fn reset_series_metadata(
            &self,
            id: &SeriesId,
            remove_embedded: bool,
        ) -> crate::error::Result<()> {
            self.resets.lock().push((id.clone(), remove_embedded));
            Ok(())
        }
    }

    struct StubProvider {
        identity: ProviderIdentity,
        results: Vec<SeriesSearchResult>,
        fail: bool,
    }

    impl StubProvider {
        fn with_hit(identity: ProviderIdentity, title: &str) -> Self {
            Self {
                identity,
                results: vec![SeriesSearchResult {
                    url: None,
                    image_url: None,
                    title: title.to_string(),
                    provider: identity,
                    result_id: ProviderSeriesId::from("ext-1"),
                }],
                fail: false,
            }
        }

        fn empty(identity: ProviderIdentity) -> Self {
            Self {
                identity,
                results: Vec::new(),
                fail: false,
            }
        }

        fn failing(identity: ProviderIdentity) -> Self {
            Self {
                identity,
                results: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        fn identity(&self) -> ProviderIdentity {
            self.identity
        }

        async fn search(&self, _name: &str) -> crate::error::Result<Vec<SeriesSearchResult>> {
            if self.fail {
                return Err(Error::transport("provider down"));
            }
            Ok(self.results.clone())
        }

        async fn series(
            &self,
            id: &ProviderSeriesId,
        ) -> crate::error::Result<ProviderSeriesMetadata> {
            if self.fail {
                return Err(Error::transport("provider down"));
            }
            Ok(ProviderSeriesMetadata {
                title: format!("{} title", id),
                summary: Some("summary".to_string()),
                publisher: None,
                release_year: Some(2001),
                genres: vec!["action".to_string()],
                cover_url: None,
            })
        }

        async fn cover(&self, _id: &ProviderSeriesId) -> crate::error::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn one_series(id: &str) -> Series {
        Series {
            id: SeriesId::from(id),
            library_id: LibraryId::from("lib-1"),
            name: "Blame!".to_string(),
        }
    }

    fn service(
        backend: StubBackend,
        providers: Vec<StubProvider>,
        reset_mode: ResetMode,
    ) -> (Arc<MetadataService>, Arc<StubBackend>, Arc<JobTracker>) {
        let backend = Arc::new(backend);
        let tracker = Arc::new(JobTracker::new(init_memory_pool().unwrap()));
        let providers = providers
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn ProviderClient>)
            .collect();
        let svc = MetadataService::new(
            backend.clone() as Arc<dyn MediaServerClient>,
            providers,
            Arc::clone(&tracker),
            Arc::new(NoopNotifier),
            reset_mode,
        );
        (svc, backend, tracker)
    }

    async fn wait_terminal(tracker: &JobTracker, id: JobId) -> Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(job) = tracker.get(id).unwrap() {
                    if job.status.is_terminal() {
                        return job;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach a terminal state")
    }

    #[tokio::test]
    async fn search_skips_failing_provider() {
        let (svc, _, _) = service(
            StubBackend::default(),
            vec![
                StubProvider::failing(ProviderIdentity::MangaDex),
                StubProvider::with_hit(ProviderIdentity::ComicVine, "Blame!"),
            ],
            ResetMode::Sync,
        );

        let results = svc.search_series("Blame!").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, ProviderIdentity::ComicVine);
    }

    #[tokio::test]
    async fn missing_cover_is_none_not_an_error() {
        let (svc, _, _) = service(
            StubBackend::default(),
            vec![StubProvider::with_hit(ProviderIdentity::MangaDex, "Blame!")],
            ResetMode::Sync,
        );

        let cover = svc
            .series_cover(ProviderIdentity::MangaDex, &ProviderSeriesId::from("ext-1"))
            .await
            .unwrap();
        assert!(cover.is_none());
    }

    #[tokio::test]
    async fn cover_for_unknown_provider_is_an_error() {
        let (svc, _, _) = service(
            StubBackend::default(),
            vec![StubProvider::empty(ProviderIdentity::MangaDex)],
            ResetMode::Sync,
        );

        let err = svc
            .series_cover(ProviderIdentity::ComicVine, &ProviderSeriesId::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn identify_writes_provider_metadata() {
        let (svc, backend, tracker) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                ..Default::default()
            },
            vec![StubProvider::with_hit(ProviderIdentity::MangaDex, "Blame!")],
            ResetMode::Sync,
        );

        let job_id = svc
            .identify_series(
                SeriesId::from("s-1"),
                ProviderIdentity::MangaDex,
                ProviderSeriesId::from("ext-1"),
            )
            .await
            .unwrap();

        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());

        let updates = backend.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.as_str(), "s-1");
        assert_eq!(updates[0].1.title.as_deref(), Some("ext-1 title"));
    }

    #[tokio::test]
    async fn match_series_uses_first_provider_hit() {
        let (svc, backend, tracker) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                ..Default::default()
            },
            vec![
                StubProvider::empty(ProviderIdentity::MangaDex),
                StubProvider::with_hit(ProviderIdentity::ComicVine, "Blame!"),
            ],
            ResetMode::Sync,
        );

        let job_id = svc.match_series(SeriesId::from("s-1")).await.unwrap();
        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(backend.updates.lock().len(), 1);
    }

    #[tokio::test]
    async fn match_with_no_hits_fails_job() {
        let (svc, _, tracker) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                ..Default::default()
            },
            vec![StubProvider::empty(ProviderIdentity::MangaDex)],
            ResetMode::Sync,
        );

        let job_id = svc.match_series(SeriesId::from("s-1")).await.unwrap();
        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("No provider"));
    }

    #[tokio::test]
    async fn malformed_embedded_metadata_fails_job_distinctly() {
        let (svc, _, tracker) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                malformed: Some("bad ComicInfo.xml".to_string()),
                ..Default::default()
            },
            vec![StubProvider::with_hit(ProviderIdentity::MangaDex, "Blame!")],
            ResetMode::Sync,
        );

        let job_id = svc.match_series(SeriesId::from("s-1")).await.unwrap();
        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .unwrap()
            .contains("Malformed embedded metadata"));
    }

    #[tokio::test]
    async fn retired_service_rejects_new_jobs() {
        let (svc, _, _) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                ..Default::default()
            },
            vec![StubProvider::with_hit(ProviderIdentity::MangaDex, "Blame!")],
            ResetMode::Sync,
        );

        svc.retire();
        let err = svc.match_series(SeriesId::from("s-1")).await.unwrap_err();
        assert!(matches!(err, Error::GenerationRetired));
    }

    #[tokio::test]
    async fn sync_reset_runs_inline() {
        let (svc, backend, _) = service(
            StubBackend {
                series: vec![one_series("s-1")],
                ..Default::default()
            },
            vec![],
            ResetMode::Sync,
        );

        let job_id = svc
            .reset_series(SeriesId::from("s-1"), true)
            .await
            .unwrap();
        assert!(job_id.is_none());
        assert_eq!(*backend.resets.lock(), vec![(SeriesId::from("s-1"), true)]);
    }

    #[tokio::test]
    async fn async_reset_runs_as_job() {
        let (svc, backend, tracker) = service(
            StubBackend {
                series: vec![one_series("s-1"), one_series("s-2")],
                ..Default::default()
            },
            vec![],
            ResetMode::Async,
        );

        let job_id = svc
            .reset_library(LibraryId::from("lib-1"), false)
            .await
            .unwrap()
            .expect("async reset should return a job id");

        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(backend.resets.lock().len(), 2);
    }
}
