//! Durable job records.
//!
//! The repository is the system of record for job history: it lets job
//! status be queried after a process restart even though the job itself
//! cannot resume. Timestamps are stored as RFC 3339 strings, status and kind
//! as lowercase strings.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{get_conn, DbPool};
use crate::error::{Error, Result};
use crate::ids::JobId;

use super::{Job, JobKind, JobStatus};

#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly created job record.
    pub fn insert(&self, job: &Job) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO jobs (id, kind, library_id, series_id, status, error, created_at, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job.id.to_string(),
                job.kind.as_str(),
                job.library_id.as_ref().map(|id| id.to_string()),
                job.series_id.as_ref().map(|id| id.to_string()),
                job.status.as_str(),
                job.error,
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Persist a lifecycle transition.
    pub fn update(&self, job: &Job) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?, error = ?, started_at = ?, finished_at = ? WHERE id = ?",
            params![
                job.status.as_str(),
                job.error,
                job.started_at.map(|t| t.to_rfc3339()),
                job.finished_at.map(|t| t.to_rfc3339()),
                job.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::database(format!("No job record for {}", job.id)));
        }
        Ok(())
    }

    /// Fetch one job record; `None` for an unknown id.
    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        let conn = get_conn(&self.pool)?;
        match conn.query_row(
            "SELECT id, kind, library_id, series_id, status, error, created_at, started_at, finished_at
             FROM jobs WHERE id = ?",
            [id.to_string()],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::database(e.to_string())),
        }
    }

    /// Most recent jobs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, library_id, series_id, status, error, created_at, started_at, finished_at
             FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )?;
        let jobs = stmt
            .query_map([limit as i64], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;

    Ok(Job {
        id: JobId::from(Uuid::parse_str(&id_str).unwrap_or_default()),
        kind: JobKind::parse(&kind_str).unwrap_or(JobKind::MatchSeries),
        library_id: row.get::<_, Option<String>>(2)?.map(Into::into),
        series_id: row.get::<_, Option<String>>(3)?.map(Into::into),
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
        error: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?).unwrap_or_else(Utc::now),
        started_at: row.get::<_, Option<String>>(7)?.as_deref().and_then(parse_ts),
        finished_at: row.get::<_, Option<String>>(8)?.as_deref().and_then(parse_ts),
    })
}

fn parse_ts<S: AsRef<str>>(s: S) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.as_ref())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
