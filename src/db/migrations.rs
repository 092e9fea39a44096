//! Embedded database migrations.
//!
//! Migrations are applied in order based on the `schema_version` table.
//! Each migration runs in its own transaction.

use rusqlite::Connection;

use crate::error::{Error, Result};

const MIGRATIONS: &[&str] = &[
    // v1: job records
    "CREATE TABLE jobs (
        id          TEXT PRIMARY KEY,
        kind        TEXT NOT NULL,
        library_id  TEXT,
        series_id   TEXT,
        status      TEXT NOT NULL,
        error       TEXT,
        created_at  TEXT NOT NULL,
        started_at  TEXT,
        finished_at TEXT
    );
    CREATE INDEX idx_jobs_status ON jobs(status);
    CREATE INDEX idx_jobs_created_at ON jobs(created_at);",
];

/// Apply all pending migrations to the given connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }

        tracing::info!(version, "Applying database migration");
        conn.execute_batch(&format!(
            "BEGIN;\n{migration}\nINSERT INTO schema_version (version) VALUES ({version});\nCOMMIT;"
        ))
        .map_err(|e| Error::database(format!("Migration {version} failed: {e}")))?;
    }

    Ok(())
}
