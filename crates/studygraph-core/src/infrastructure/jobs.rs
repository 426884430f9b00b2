//! Extraction job store
//!
//! Persisted rows are the source of truth for job status; the in-process
//! runner only ever transitions them forward.

use crate::domain::{self, ExtractionJob, JobMode, JobStats, JobStatus};
use crate::error::Result;
use sqlx::{FromRow, SqlitePool};
use tracing::info;
use uuid::Uuid;

/// SQLite store for extraction jobs
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fresh queued job and return it
    pub async fn enqueue(&self, workspace_id: i64, mode: JobMode) -> Result<ExtractionJob> {
        let id = Uuid::new_v4().to_string();
        let now = domain::now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO extraction_jobs (id, workspace_id, mode, status, stats, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', '{}', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(mode.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, workspace_id = workspace_id, mode = %mode, "Extraction job queued");
        self.require(&id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExtractionJob>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM extraction_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_job()).transpose()
    }

    pub async fn require(&self, id: &str) -> Result<ExtractionJob> {
        self.get(id)
            .await?
            .ok_or_else(|| crate::Error::JobNotFound(id.to_string()))
    }

    /// Job scoped to a workspace; missing or foreign jobs both read as absent
    pub async fn get_for_workspace(
        &self,
        workspace_id: i64,
        id: &str,
    ) -> Result<Option<ExtractionJob>> {
        Ok(self
            .get(id)
            .await?
            .filter(|job| job.workspace_id == workspace_id))
    }

    /// The queued or processing job for a workspace, if any
    pub async fn find_active(&self, workspace_id: i64) -> Result<Option<ExtractionJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM extraction_jobs
            WHERE workspace_id = ? AND status IN ('queued', 'processing')
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_job()).transpose()
    }

    /// Most recent fully successful job, used by the staleness check. A
    /// partial_failed run does not count: its failed sources still need a
    /// re-extraction.
    pub async fn latest_completed(&self, workspace_id: i64) -> Result<Option<ExtractionJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM extraction_jobs
            WHERE workspace_id = ? AND status = 'done'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_job()).transpose()
    }

    pub async fn list_recent(&self, workspace_id: i64, limit: i64) -> Result<Vec<ExtractionJob>> {
        let limit = limit.clamp(1, 200);
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM extraction_jobs
            WHERE workspace_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_job()).collect()
    }

    pub async fn mark_processing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE extraction_jobs SET status = 'processing', updated_at = ? WHERE id = ?")
            .bind(domain::now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write the terminal status and final stats in one update
    pub async fn finish(&self, id: &str, status: JobStatus, stats: &JobStats) -> Result<()> {
        sqlx::query("UPDATE extraction_jobs SET status = ?, stats = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(super::to_json(stats)?)
            .bind(domain::now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        info!(job_id = %id, status = %status, "Extraction job finished");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    workspace_id: i64,
    mode: String,
    status: String,
    stats: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self) -> Result<ExtractionJob> {
        let mode = JobMode::parse(&self.mode)
            .ok_or_else(|| crate::Error::Other(format!("Invalid job mode: {}", self.mode)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| crate::Error::Other(format!("Invalid job status: {}", self.status)))?;

        Ok(ExtractionJob {
            id: self.id,
            workspace_id: self.workspace_id,
            mode,
            status,
            stats: serde_json::from_str(&self.stats).unwrap_or_default(),
            created_at: domain::parse_rfc3339(&self.created_at)?,
            updated_at: domain::parse_rfc3339(&self.updated_at)?,
        })
    }
}
