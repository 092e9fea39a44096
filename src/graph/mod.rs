//! Hot-reloadable service graph.
//!
//! A [`Generation`] is one complete, immutable bundle of backend clients,
//! metadata services, provider clients and the notification service, built
//! from a single configuration snapshot. The [`ServiceGraph`] holds the
//! current generation behind an atomic pointer swap: readers load it
//! lock-free per operation, writers replace it wholesale under a single
//! reconfiguration mutex. The base HTTP client, database pool and job
//! tracker are shared across generations and never torn down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{KavitaClient, KomgaClient, MediaServerClient};
use crate::config::{self, BackendConfig, Config};
use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::ids::{BackendKind, LibraryId};
use crate::jobs::JobTracker;
use crate::metadata::MetadataService;
use crate::notify::{NoopNotifier, NotificationService, WebhookNotifier};
use crate::providers::{ComicVineClient, MangaDexClient, ProviderClient};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One backend's slice of a generation.
pub struct BackendEntry {
    pub client: Arc<dyn MediaServerClient>,
    pub service: Arc<MetadataService>,
    /// Explicit library routing from config; consulted before any
    /// owning-backend lookup.
    routing: Vec<LibraryId>,
}

impl BackendEntry {
    pub fn routes(&self, library_id: &LibraryId) -> bool {
        self.routing.contains(library_id)
    }
}

/// An immutable set of live clients and services produced by one
/// configuration load. Superseded wholesale by a newer generation; never
/// mutated after construction.
pub struct Generation {
    backends: Vec<(BackendKind, BackendEntry)>,
    providers: Vec<Arc<dyn ProviderClient>>,
    notifier: Arc<dyn NotificationService>,
    retired: AtomicBool,
}

impl Generation {
    /// Build a complete generation from configuration. On any failure
    /// nothing is published and the caller keeps its previous generation.
    fn build(
        config: &Config,
        base_client: &reqwest::Client,
        tracker: &Arc<JobTracker>,
    ) -> Result<Arc<Self>> {
        let providers = build_providers(config, base_client)?;

        let notifier: Arc<dyn NotificationService> = if config.notifications.webhooks.is_empty() {
            Arc::new(NoopNotifier)
        } else {
            Arc::new(WebhookNotifier::new(
                &config.notifications,
                base_client.clone(),
            ))
        };

        let mut backends = Vec::new();
        if let Some(cfg) = &config.komga {
            let client: Arc<dyn MediaServerClient> =
                Arc::new(KomgaClient::new(cfg, base_client.clone()));
            backends.push((
                BackendKind::Komga,
                backend_entry(cfg, client, &providers, tracker, &notifier),
            ));
        }
        if let Some(cfg) = &config.kavita {
            let client: Arc<dyn MediaServerClient> =
                Arc::new(KavitaClient::new(cfg, base_client.clone()));
            backends.push((
                BackendKind::Kavita,
                backend_entry(cfg, client, &providers, tracker, &notifier),
            ));
        }

        Ok(Arc::new(Self {
            backends,
            providers,
            notifier,
            retired: AtomicBool::new(false),
        }))
    }

    /// The entry for one backend kind, if configured.
    pub fn backend(&self, kind: BackendKind) -> Option<&BackendEntry> {
        self.backends
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, entry)| entry)
    }

    /// All configured backends in fixed kind order.
    pub fn backends(&self) -> impl Iterator<Item = (BackendKind, &BackendEntry)> {
        self.backends.iter().map(|(k, entry)| (*k, entry))
    }

    /// The sole / first configured backend.
    pub fn default_backend(&self) -> Option<&BackendEntry> {
        self.backends.first().map(|(_, entry)| entry)
    }

    pub fn providers(&self) -> &[Arc<dyn ProviderClient>] {
        &self.providers
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationService> {
        &self.notifier
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Transition Active -> Retired: reject new job submissions on every
    /// service while letting work already in flight drain.
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        for (_, entry) in &self.backends {
            entry.service.retire();
        }
    }
}

#[cfg(test)]
impl Generation {
    pub(crate) fn stub(backends: Vec<(BackendKind, BackendEntry)>) -> Self {
        Self {
            backends,
            providers: Vec::new(),
            notifier: Arc::new(NoopNotifier),
            retired: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl BackendEntry {
    pub(crate) fn stub(
        client: Arc<dyn MediaServerClient>,
        service: Arc<MetadataService>,
        routing: Vec<LibraryId>,
    ) -> Self {
        Self {
            client,
            service,
            routing,
        }
    }
}

fn backend_entry(
    cfg: &BackendConfig,
    client: Arc<dyn MediaServerClient>,
    providers: &[Arc<dyn ProviderClient>],
    tracker: &Arc<JobTracker>,
    notifier: &Arc<dyn NotificationService>,
) -> BackendEntry {
    let service = MetadataService::new(
        Arc::clone(&client),
        providers.to_vec(),
        Arc::clone(tracker),
        Arc::clone(notifier),
        cfg.reset_mode,
    );
    BackendEntry {
        client,
        service,
        routing: cfg.libraries.iter().cloned().map(LibraryId::from).collect(),
    }
}

fn build_providers(
    config: &Config,
    base_client: &reqwest::Client,
) -> Result<Vec<Arc<dyn ProviderClient>>> {
    let mut providers: Vec<Arc<dyn ProviderClient>> = Vec::new();
    for (identity, cfg) in config.providers.enabled() {
        match identity {
            crate::ids::ProviderIdentity::MangaDex => {
                providers.push(Arc::new(MangaDexClient::new(cfg, base_client.clone())));
            }
            crate::ids::ProviderIdentity::ComicVine => {
                if cfg.api_key.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::reconfiguration(
                        "comicvine provider requires an api_key",
                    ));
                }
                providers.push(Arc::new(ComicVineClient::new(cfg, base_client.clone())));
            }
        }
    }
    Ok(providers)
}

/// Owns the current generation and performs atomic hot-swap on
/// reconfiguration.
pub struct ServiceGraph {
    current: ArcSwap<Generation>,
    config: ArcSwap<Config>,
    reconfigure_lock: Mutex<()>,
    base_client: reqwest::Client,
    tracker: Arc<JobTracker>,
    config_path: Option<PathBuf>,
}

impl ServiceGraph {
    /// Build the initial generation from the given configuration.
    pub fn new(config: Config, config_path: Option<PathBuf>, pool: DbPool) -> Result<Arc<Self>> {
        config::validate_config(&config).map_err(|e| Error::config(e.to_string()))?;

        let base_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_TIMEOUT)
            .user_agent(concat!("metascribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        let tracker = Arc::new(JobTracker::new(pool));
        let generation = Generation::build(&config, &base_client, &tracker)?;

        Ok(Arc::new(Self {
            current: ArcSwap::from(generation),
            config: ArcSwap::from_pointee(config),
            reconfigure_lock: Mutex::new(()),
            base_client,
            tracker,
            config_path,
        }))
    }

    /// The current generation. Dependents re-read this per operation rather
    /// than caching it at construction time.
    pub fn current(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// The configuration snapshot the current generation was built from.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Swap the whole service graph to a new configuration.
    ///
    /// At most one reconfiguration runs at a time; dispatch against the
    /// current generation is never blocked. The new config is persisted
    /// before the new generation is built; if the build fails, the previous
    /// generation remains current and the error is returned.
    pub async fn reconfigure(&self, new_config: Config) -> Result<()> {
        let _guard = self.reconfigure_lock.lock().await;
        info!("Reconfiguring service graph");

        config::validate_config(&new_config).map_err(|e| Error::reconfiguration(e.to_string()))?;

        if let Some(path) = &self.config_path {
            config::persist::save_config(path, &new_config)
                .map_err(|e| Error::reconfiguration(format!("Failed to persist config: {e}")))?;
        }

        let next = Generation::build(&new_config, &self.base_client, &self.tracker)?;

        // Config snapshot first: a reader pairing `config()` with `current()`
        // must never see the old config against the new generation.
        self.config.store(Arc::new(new_config));
        let previous = self.current.swap(next);

        // Retirement runs after publication and must not block new dispatch.
        previous.retire();
        if Arc::strong_count(&previous) > 1 {
            warn!("Previous generation still has in-flight users; it will drain");
        }

        info!("Service graph reconfigured");
        Ok(())
    }
}
