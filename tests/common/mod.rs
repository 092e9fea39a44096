//! Shared test harness for integration tests.
//!
//! Builds configs pointing at a mock Komga endpoint and service graphs
//! backed by an in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use metascribe::config::{BackendConfig, Config, ProviderConfig, ResetMode};
use metascribe::db::init_memory_pool;
use metascribe::graph::ServiceGraph;
use metascribe::ids::JobId;
use metascribe::jobs::{Job, JobTracker};

/// A config with a single Komga backend at the given base URL.
pub fn komga_config(base_url: &str, libraries: &[&str]) -> Config {
    let mut config = Config::default();
    config.komga = Some(BackendConfig {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        libraries: libraries.iter().map(|s| s.to_string()).collect(),
        reset_mode: ResetMode::Sync,
    });
    config.providers.mangadex = Some(ProviderConfig::default());
    config
}

/// A service graph over an in-memory database, no persisted config file.
pub fn graph_with(config: Config) -> Arc<ServiceGraph> {
    ServiceGraph::new(config, None, init_memory_pool().expect("in-memory pool"))
        .expect("service graph")
}

/// Poll the tracker until the job reaches a terminal state.
pub async fn wait_terminal(tracker: &JobTracker, id: JobId) -> Job {
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
