//! Extraction job scheduling
//!
//! `start_job` inserts the queued row, spawns the runner and returns; the
//! persisted row is the only status anyone reads. The runner never lets an
//! error escape the task: per-source faults are recorded and the loop
//! continues, runner-level faults land on the job row as a synthetic
//! bootstrap failure.

pub mod staleness;

pub use staleness::{StalenessDecision, StalenessDetector};

use crate::config::ExtractionConfig;
use crate::domain::{
    ExtractionJob, FailedSource, JobMode, JobStats, JobStatus, Resource, Source, SourceStatus,
};
use crate::error::Result;
use crate::extract::ExtractionEngine;
use crate::graph::cache::{workspace_cache_prefix, GraphCache};
use crate::infrastructure::{JobStore, ResourceStore, SourceStore, WorkspaceStore};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct JobScheduler {
    pool: SqlitePool,
    #[allow(dead_code)]
    config: ExtractionConfig,
    workspaces: WorkspaceStore,
    jobs: JobStore,
    sources: SourceStore,
    resources: ResourceStore,
    engine: Arc<ExtractionEngine>,
    cache: Arc<dyn GraphCache>,
}

impl JobScheduler {
    pub fn new(
        pool: SqlitePool,
        config: ExtractionConfig,
        engine: Arc<ExtractionEngine>,
        cache: Arc<dyn GraphCache>,
    ) -> Self {
        Self {
            workspaces: WorkspaceStore::new(pool.clone()),
            jobs: JobStore::new(pool.clone()),
            sources: SourceStore::new(pool.clone()),
            resources: ResourceStore::new(pool.clone()),
            pool,
            config,
            engine,
            cache,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Queue a job and detach its runner. Refuses while another job for the
    /// workspace is still queued or processing.
    pub async fn start_job(
        &self,
        workspace_id: i64,
        mode: JobMode,
        source_ids: Option<Vec<i64>>,
    ) -> Result<ExtractionJob> {
        self.workspaces.require(workspace_id).await?;
        if let Some(active) = self.jobs.find_active(workspace_id).await? {
            return Err(crate::Error::JobAlreadyActive(workspace_id, active.id));
        }

        let job = self.jobs.enqueue(workspace_id, mode).await?;
        let scheduler = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            scheduler.run(&job_id, workspace_id, mode, source_ids).await;
        });
        Ok(job)
    }

    /// Failure records of one job, paginated. Page is 1-based.
    pub async fn job_errors(
        &self,
        workspace_id: i64,
        job_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<FailedSource>, i64)> {
        let job = self
            .jobs
            .get_for_workspace(workspace_id, job_id)
            .await?
            .ok_or_else(|| crate::Error::JobNotFound(job_id.to_string()))?;

        let failures = job.stats.failed_sources;
        let total = failures.len() as i64;
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let start = ((page - 1) * page_size) as usize;
        let slice = failures
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok((slice, total))
    }

    async fn run(&self, job_id: &str, workspace_id: i64, mode: JobMode, source_ids: Option<Vec<i64>>) {
        if let Err(e) = self.jobs.mark_processing(job_id).await {
            error!(job_id = %job_id, error = %e, "Failed to mark job processing");
            return;
        }

        let (status, stats) = match self.execute(workspace_id, mode, source_ids).await {
            Ok(stats) => (stats.terminal_status(), stats),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job runner fault");
                let mut stats = JobStats {
                    mode: mode.as_str().to_string(),
                    ..Default::default()
                };
                stats.record_failure(FailedSource::new(None, "bootstrap", &e.to_string()));
                (JobStatus::Failed, stats)
            }
        };

        if let Err(e) = self.jobs.finish(job_id, status, &stats).await {
            error!(job_id = %job_id, error = %e, "Failed to persist job result");
        }
        self.cache
            .invalidate_prefix(&workspace_cache_prefix(workspace_id));
    }

    async fn execute(
        &self,
        workspace_id: i64,
        mode: JobMode,
        source_ids: Option<Vec<i64>>,
    ) -> Result<JobStats> {
        let targets = self.load_targets(workspace_id, source_ids).await?;
        let mut stats = JobStats {
            mode: mode.as_str().to_string(),
            ..Default::default()
        };
        if targets.is_empty() {
            stats.reason = Some("no_sources".to_string());
            return Ok(stats);
        }

        let resource_ids: Vec<i64> = targets.iter().filter_map(|s| s.resource_id).collect();
        let resources: HashMap<i64, Resource> = self
            .resources
            .get_many(&resource_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        for source in &targets {
            stats.processed_sources += 1;
            let resource = source.resource_id.and_then(|id| resources.get(&id));
            match self.rebuild_one(source, resource, mode).await {
                Ok(outcome) => {
                    stats.succeeded_sources += 1;
                    stats.entities_created += outcome.entities;
                    stats.relations_created += outcome.relations;
                    stats.evidences_created += outcome.evidences;
                    if source.status != SourceStatus::Published {
                        self.sources.set_status(source.id, SourceStatus::Indexed).await?;
                    }
                }
                Err(e) => {
                    warn!(source_id = source.id, error = %e, "Source extraction failed");
                    stats.record_failure(FailedSource::new(
                        Some(source.id),
                        "extract",
                        &e.to_string(),
                    ));
                    self.sources.set_status(source.id, SourceStatus::Error).await?;
                }
            }
        }

        info!(
            workspace_id = workspace_id,
            processed = stats.processed_sources,
            succeeded = stats.succeeded_sources,
            failed = stats.failed_sources_count,
            "Extraction batch finished"
        );
        Ok(stats)
    }

    /// One source, one transaction; a failure rolls the whole source back
    async fn rebuild_one(
        &self,
        source: &Source,
        resource: Option<&Resource>,
        mode: JobMode,
    ) -> Result<crate::extract::ExtractOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = self
            .engine
            .rebuild_source(&mut *tx, source, resource, mode)
            .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn load_targets(
        &self,
        workspace_id: i64,
        source_ids: Option<Vec<i64>>,
    ) -> Result<Vec<Source>> {
        match source_ids {
            Some(ids) => {
                let sources = self.sources.get_many(&ids).await?;
                Ok(sources
                    .into_iter()
                    .filter(|s| s.workspace_id == workspace_id)
                    .collect())
            }
            None => self.sources.list_active(workspace_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiClient;
    use crate::graph::cache::InMemoryGraphCache;
    use crate::infrastructure::sources::tests::{sample_new_source, setup_workspace};
    use crate::storage::Database;
    use std::time::Duration;

    async fn wait_for_terminal(jobs: &JobStore, job_id: &str) -> ExtractionJob {
        for _ in 0..100 {
            let job = jobs.require(job_id).await.unwrap();
            if !job.status.is_active() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Job {} never reached a terminal state", job_id);
    }

    fn scheduler(pool: &SqlitePool) -> JobScheduler {
        let config = ExtractionConfig::default();
        let ai = Arc::new(AiClient::builder().api_key(None).build().unwrap());
        let engine = Arc::new(ExtractionEngine::new(config.clone(), ai));
        JobScheduler::new(
            pool.clone(),
            config,
            engine,
            Arc::new(InMemoryGraphCache::default()),
        )
    }

    #[tokio::test]
    async fn test_empty_workspace_job_skipped() {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let scheduler = scheduler(db.pool());

        let job = scheduler
            .start_job(workspace_id, JobMode::Quick, None)
            .await
            .unwrap();
        let finished = wait_for_terminal(scheduler.jobs(), &job.id).await;
        assert_eq!(finished.status, JobStatus::Skipped);
        assert_eq!(finished.stats.reason.as_deref(), Some("no_sources"));
    }

    #[tokio::test]
    async fn test_job_processes_sources_and_flips_status() {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let sources = SourceStore::new(db.pool().clone());
        let source = sources
            .insert(&sample_new_source(workspace_id, Some(42)))
            .await
            .unwrap();
        let mut published = sample_new_source(workspace_id, None);
        published.status = SourceStatus::Published;
        let published = sources.insert(&published).await.unwrap();

        let scheduler = scheduler(db.pool());
        let job = scheduler
            .start_job(workspace_id, JobMode::Quick, None)
            .await
            .unwrap();
        let finished = wait_for_terminal(scheduler.jobs(), &job.id).await;

        assert_eq!(finished.status, JobStatus::Done);
        assert_eq!(finished.stats.processed_sources, 2);
        assert_eq!(finished.stats.succeeded_sources, 2);
        assert!(finished.stats.entities_created > 0);

        let indexed = sources.get(source.id).await.unwrap().unwrap();
        assert_eq!(indexed.status, SourceStatus::Indexed);
        // Published sources keep their status
        let kept = sources.get(published.id).await.unwrap().unwrap();
        assert_eq!(kept.status, SourceStatus::Published);
    }

    #[tokio::test]
    async fn test_single_active_job_per_workspace() {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let scheduler = scheduler(db.pool());

        let jobs = scheduler.jobs().clone();
        let stuck = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();

        let err = scheduler
            .start_job(workspace_id, JobMode::Full, None)
            .await
            .unwrap_err();
        match err {
            crate::Error::JobAlreadyActive(ws, id) => {
                assert_eq!(ws, workspace_id);
                assert_eq!(id, stuck.id);
            }
            other => panic!("Expected JobAlreadyActive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_source_ids_scoped_to_workspace() {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let other = setup_workspace(db.pool()).await;
        let sources = SourceStore::new(db.pool().clone());
        let mine = sources
            .insert(&sample_new_source(workspace_id, Some(1)))
            .await
            .unwrap();
        let foreign = sources
            .insert(&sample_new_source(other, Some(2)))
            .await
            .unwrap();

        let scheduler = scheduler(db.pool());
        let job = scheduler
            .start_job(workspace_id, JobMode::Quick, Some(vec![mine.id, foreign.id]))
            .await
            .unwrap();
        let finished = wait_for_terminal(scheduler.jobs(), &job.id).await;
        assert_eq!(finished.stats.processed_sources, 1);
    }

    #[tokio::test]
    async fn test_job_errors_pagination() {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let scheduler = scheduler(db.pool());
        let jobs = scheduler.jobs();

        let job = jobs.enqueue(workspace_id, JobMode::Quick).await.unwrap();
        let mut stats = JobStats::default();
        for i in 1..=5 {
            stats.record_failure(FailedSource::new(Some(i), "extract", "boom"));
        }
        jobs.finish(&job.id, JobStatus::Failed, &stats).await.unwrap();

        let (page, total) = scheduler
            .job_errors(workspace_id, &job.id, 2, 2)
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].source_id, Some(3));

        // Out-of-range pages clamp rather than error
        let (empty, _) = scheduler
            .job_errors(workspace_id, &job.id, 99, 0)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
