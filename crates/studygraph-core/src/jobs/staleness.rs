//! Workspace staleness evaluation
//!
//! Decides whether a workspace needs a fresh extraction pass. The reason
//! order is fixed; first match wins.

use crate::domain::ExtractionJob;
use crate::error::Result;
use crate::infrastructure::{JobStore, ResourceStore, SourceStore};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessDecision {
    pub run: bool,
    pub reason: String,
}

impl StalenessDecision {
    fn run(reason: &str) -> Self {
        Self {
            run: true,
            reason: reason.to_string(),
        }
    }

    fn skip(reason: &str) -> Self {
        Self {
            run: false,
            reason: reason.to_string(),
        }
    }
}

pub struct StalenessDetector {
    jobs: JobStore,
    sources: SourceStore,
    resources: ResourceStore,
    staleness_hours: i64,
}

impl StalenessDetector {
    pub fn new(pool: SqlitePool, staleness_hours: i64) -> Self {
        Self {
            jobs: JobStore::new(pool.clone()),
            sources: SourceStore::new(pool.clone()),
            resources: ResourceStore::new(pool),
            staleness_hours,
        }
    }

    pub async fn evaluate(&self, workspace_id: i64, force: bool) -> Result<StalenessDecision> {
        if force {
            return Ok(StalenessDecision::run("forced"));
        }

        let active_sources = self.sources.list_active(workspace_id).await?;
        if active_sources.is_empty() {
            return Ok(StalenessDecision::skip("no_sources"));
        }

        let latest = match self.jobs.latest_completed(workspace_id).await? {
            Some(job) => job,
            None => return Ok(StalenessDecision::run("no_extract_job")),
        };

        // Compare against completion time; changes the job already saw
        // while running do not count as new.
        let updated = self
            .resources
            .count_updated_since(workspace_id, latest.updated_at)
            .await?;
        if updated > 0 {
            debug!(workspace_id = workspace_id, updated = updated, "Resources changed since last job");
            return Ok(StalenessDecision::run("resources_updated"));
        }

        if self.is_expired(&latest) {
            return Ok(StalenessDecision::run("stale_over_12h"));
        }

        Ok(StalenessDecision::skip("fresh"))
    }

    fn is_expired(&self, job: &ExtractionJob) -> bool {
        Utc::now() - job.updated_at > Duration::hours(self.staleness_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobMode, JobStats, JobStatus};
    use crate::infrastructure::sources::tests::{sample_new_source, setup_workspace};
    use crate::storage::Database;

    async fn setup() -> (Database, StalenessDetector, i64) {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let detector = StalenessDetector::new(db.pool().clone(), 12);
        (db, detector, workspace_id)
    }

    #[tokio::test]
    async fn test_reason_order() {
        let (db, detector, workspace_id) = setup().await;

        // Forced wins over everything, even an empty workspace
        let forced = detector.evaluate(workspace_id, true).await.unwrap();
        assert_eq!(forced, StalenessDecision::run("forced"));

        let empty = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(empty, StalenessDecision::skip("no_sources"));

        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();
        let no_job = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(no_job, StalenessDecision::run("no_extract_job"));
    }

    #[tokio::test]
    async fn test_resource_updates_trigger_rerun() {
        let (db, detector, workspace_id) = setup().await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();

        let jobs = JobStore::new(db.pool().clone());
        let job = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();
        jobs.finish(&job.id, JobStatus::Done, &JobStats::default()).await.unwrap();

        let fresh = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(fresh, StalenessDecision::skip("fresh"));

        // Touch the backing resource after the job
        let resources = ResourceStore::new(db.pool().clone());
        resources
            .upsert(&crate::infrastructure::resources::tests::sample_resource(42, "physics"))
            .await
            .unwrap();
        let stale = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(stale, StalenessDecision::run("resources_updated"));
    }

    #[tokio::test]
    async fn test_partial_failure_still_needs_rerun() {
        let (db, detector, workspace_id) = setup().await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();

        let jobs = JobStore::new(db.pool().clone());
        let job = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();
        jobs.finish(&job.id, JobStatus::PartialFailed, &JobStats::default())
            .await
            .unwrap();

        let decision = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(decision, StalenessDecision::run("no_extract_job"));
    }

    #[tokio::test]
    async fn test_mid_job_resource_change_reads_fresh() {
        let (db, detector, workspace_id) = setup().await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();

        let jobs = JobStore::new(db.pool().clone());
        let job = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();

        // Resource touched while the job was running; completion supersedes it
        let resources = ResourceStore::new(db.pool().clone());
        resources
            .upsert(&crate::infrastructure::resources::tests::sample_resource(42, "physics"))
            .await
            .unwrap();
        jobs.finish(&job.id, JobStatus::Done, &JobStats::default()).await.unwrap();

        let decision = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(decision, StalenessDecision::skip("fresh"));
    }

    #[tokio::test]
    async fn test_old_job_is_stale() {
        let (db, _detector, workspace_id) = setup().await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();

        let jobs = JobStore::new(db.pool().clone());
        let job = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();
        jobs.finish(&job.id, JobStatus::Done, &JobStats::default()).await.unwrap();

        // A zero-hour window makes any completed job stale
        let detector = StalenessDetector::new(db.pool().clone(), 0);
        let decision = detector.evaluate(workspace_id, false).await.unwrap();
        assert_eq!(decision, StalenessDecision::run("stale_over_12h"));
    }
}
