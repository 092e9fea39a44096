//! Job completion / failure notifications.
//!
//! A [`NotificationService`] is a fire-and-forget sink: delivery failures are
//! logged, never propagated into the job outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::NotificationsConfig;
use crate::jobs::{Job, JobStatus};

/// Event emitted when an asynchronous metadata job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum NotificationEvent {
    JobCompleted {
        job_id: String,
        kind: String,
        library_id: Option<String>,
        series_id: Option<String>,
    },
    JobFailed {
        job_id: String,
        kind: String,
        library_id: Option<String>,
        series_id: Option<String>,
        error: String,
    },
}

impl NotificationEvent {
    /// Build the event matching a finished job's terminal state.
    pub fn from_job(job: &Job) -> Option<Self> {
        let library_id = job.library_id.as_ref().map(|id| id.to_string());
        let series_id = job.series_id.as_ref().map(|id| id.to_string());
        match job.status {
            JobStatus::Completed => Some(NotificationEvent::JobCompleted {
                job_id: job.id.to_string(),
                kind: job.kind.to_string(),
                library_id,
                series_id,
            }),
            JobStatus::Failed => Some(NotificationEvent::JobFailed {
                job_id: job.id.to_string(),
                kind: job.kind.to_string(),
                library_id,
                series_id,
                error: job.error.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Fire-and-forget notification sink.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Posts events as JSON to each configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig, base_client: reqwest::Client) -> Self {
        Self {
            client: base_client,
            urls: config.webhooks.clone(),
        }
    }
}

#[async_trait]
impl NotificationService for WebhookNotifier {
    async fn notify(&self, event: NotificationEvent) {
        for url in &self.urls {
            match self.client.post(url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url, "Delivered notification");
                }
                Ok(resp) => {
                    warn!(url, status = resp.status().as_u16(), "Notification rejected");
                }
                Err(e) => {
                    warn!(url, error = %e, "Notification delivery failed");
                }
            }
        }
    }
}

/// Used when no notification targets are configured.
pub struct NoopNotifier;

#[async_trait]
impl NotificationService for NoopNotifier {
    async fn notify(&self, _event: NotificationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SeriesId;
    use crate::jobs::JobKind;

    #[test]
    fn event_from_terminal_job() {
        let mut job = Job::new(JobKind::MatchSeries, None, Some(SeriesId::from("s1")));
        assert!(NotificationEvent::from_job(&job).is_none());

        job.status = JobStatus::Failed;
        job.error = Some("boom".to_string());
        match NotificationEvent::from_job(&job) {
            Some(NotificationEvent::JobFailed { error, series_id, .. }) => {
                assert_eq!(error, "boom");
                assert_eq!(series_id.as_deref(), Some("s1"));
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn event_serializes_with_tag() {
        let mut job = Job::new(JobKind::MatchLibrary, None, None);
        job.status = JobStatus::Completed;
        let event = NotificationEvent::from_job(&job).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"job_completed\""));
    }
}
