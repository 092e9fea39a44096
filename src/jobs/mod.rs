//! Job model and tracking for asynchronous metadata operations.
//!
//! A [`Job`] is the only channel of communication back to pollers once an
//! asynchronous operation has been dispatched: the caller receives a
//! [`JobId`](crate::ids::JobId) immediately and observes progress through
//! [`JobTracker::get`]. The tracker keeps a fast-path in-memory map and
//! writes through to the [`JobRepository`], the durable system of record.

pub mod repository;

pub use repository::JobRepository;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DbPool;
use crate::error::Result;
use crate::ids::{JobId, LibraryId, SeriesId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub library_id: Option<LibraryId>,
    pub series_id: Option<SeriesId>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IdentifySeries,
    MatchSeries,
    MatchLibrary,
    ResetSeries,
    ResetLibrary,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::IdentifySeries => "identify_series",
            JobKind::MatchSeries => "match_series",
            JobKind::MatchLibrary => "match_library",
            JobKind::ResetSeries => "reset_series",
            JobKind::ResetLibrary => "reset_library",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identify_series" => Some(JobKind::IdentifySeries),
            "match_series" => Some(JobKind::MatchSeries),
            "match_library" => Some(JobKind::MatchLibrary),
            "reset_series" => Some(JobKind::ResetSeries),
            "reset_library" => Some(JobKind::ResetLibrary),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed are immutable once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl Job {
    pub fn new(kind: JobKind, library_id: Option<LibraryId>, series_id: Option<SeriesId>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            library_id,
            series_id,
            status: JobStatus::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }
}

/// Allocates job identifiers and records lifecycle transitions.
///
/// Safe under concurrent creation from multiple dispatches. The repository
/// write in [`create`](Self::create) happens before the job is returned, so a
/// `get` on the returned id always observes at least a Pending record.
pub struct JobTracker {
    jobs: RwLock<HashMap<JobId, Job>>,
    repository: JobRepository,
}

impl JobTracker {
    pub fn new(pool: DbPool) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            repository: JobRepository::new(pool),
        }
    }

    /// Create a Pending job and persist it.
    pub fn create(
        &self,
        kind: JobKind,
        library_id: Option<LibraryId>,
        series_id: Option<SeriesId>,
    ) -> Result<Job> {
        let job = Job::new(kind, library_id, series_id);
        self.repository.insert(&job)?;
        self.jobs.write().insert(job.id, job.clone());
        Ok(job)
    }

    /// Transition a job to Running. A no-op on terminal jobs.
    pub fn mark_running(&self, id: JobId) -> Result<()> {
        self.transition(id, "running", |job| job.start())
    }

    /// Transition a job to Completed. A no-op on terminal jobs.
    pub fn mark_completed(&self, id: JobId) -> Result<()> {
        self.transition(id, "completed", |job| job.complete())
    }

    /// Transition a job to Failed, capturing the error detail. A no-op on
    /// terminal jobs.
    pub fn mark_failed(&self, id: JobId, error: &str) -> Result<()> {
        self.transition(id, "failed", |job| job.fail(error))
    }

    fn transition(&self, id: JobId, to: &str, apply: impl FnOnce(&mut Job)) -> Result<()> {
        let updated = {
            let mut jobs = self.jobs.write();
            match jobs.get_mut(&id) {
                Some(job) if job.status.is_terminal() => {
                    warn!(job_id = %id, status = job.status.as_str(), to, "Ignoring transition on terminal job");
                    return Ok(());
                }
                Some(job) => {
                    apply(job);
                    job.clone()
                }
                None => {
                    warn!(job_id = %id, to, "Transition on unknown job");
                    return Ok(());
                }
            }
        };

        self.repository.update(&updated)?;

        if updated.status.is_terminal() {
            // Terminal jobs drop out of the fast path; the repository keeps
            // the durable record for later lookup.
            self.jobs.write().remove(&id);
        }
        Ok(())
    }

    /// Look up a job by id. Absence means an unknown or expired job id, not
    /// an error.
    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        if let Some(job) = self.jobs.read().get(&id) {
            return Ok(Some(job.clone()));
        }
        self.repository.get(id)
    }

    /// Most recent jobs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Job>> {
        self.repository.recent(limit)
    }
}
