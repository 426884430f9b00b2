//! High-level facade wiring the stores, registry, scheduler and responders
//! together for the CLI.

use crate::ai::AiClient;
use crate::config::Config;
use crate::domain::{ExtractionJob, FailedSource, JobMode, Resource, Source, Workspace};
use crate::error::Result;
use crate::extract::ExtractionEngine;
use crate::graph::{
    graph_cache_key, Graph, GraphAssembler, GraphCache, GraphQuery, InMemoryGraphCache,
};
use crate::infrastructure::{QaLog, ResourceStore, SourceStore, WorkspaceStore};
use crate::jobs::{JobScheduler, StalenessDetector};
use crate::qa::{QaAnswer, QaResponder};
use crate::registry::{SourceRegistry, SyncReport, UploadRequest};
use crate::search::{SearchResponse, SemanticRanker};
use crate::storage::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Result of an auto-refresh probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapOutcome {
    pub triggered: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
}

pub struct GraphService {
    db: Database,
    config: Config,
    cache: Arc<dyn GraphCache>,
    workspaces: WorkspaceStore,
    resources: ResourceStore,
    sources: SourceStore,
    registry: SourceRegistry,
    scheduler: JobScheduler,
    assembler: GraphAssembler,
    ranker: SemanticRanker,
    qa: QaResponder,
    staleness: StalenessDetector,
}

impl GraphService {
    pub fn new(db: Database, config: Config) -> Result<Self> {
        let pool = db.pool().clone();
        let cache: Arc<dyn GraphCache> = Arc::new(InMemoryGraphCache::with_ttl_seconds(
            config.graph.cache_ttl_seconds,
        ));
        let ai = Arc::new(AiClient::from_config(&config.ai)?);
        let engine = Arc::new(ExtractionEngine::new(config.extraction.clone(), ai.clone()));

        Ok(Self {
            workspaces: WorkspaceStore::new(pool.clone()),
            resources: ResourceStore::new(pool.clone()),
            sources: SourceStore::new(pool.clone()),
            registry: SourceRegistry::new(
                WorkspaceStore::new(pool.clone()),
                ResourceStore::new(pool.clone()),
                SourceStore::new(pool.clone()),
                cache.clone(),
            ),
            scheduler: JobScheduler::new(
                pool.clone(),
                config.extraction.clone(),
                engine,
                cache.clone(),
            ),
            assembler: GraphAssembler::new(pool.clone()),
            ranker: SemanticRanker::new(ai.clone()),
            qa: QaResponder::new(pool.clone(), ai),
            staleness: StalenessDetector::new(pool, config.extraction.staleness_hours),
            cache,
            config,
            db,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- workspaces ---

    pub async fn create_workspace(
        &self,
        stage: &str,
        subject: &str,
        name: &str,
        description: Option<&str>,
        actor: i64,
    ) -> Result<Workspace> {
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidInput("Workspace name must not be empty".into()));
        }
        self.workspaces
            .create(stage, subject, name, description, actor)
            .await
    }

    pub async fn get_workspace(&self, id: i64) -> Result<Workspace> {
        self.workspaces.require(id).await
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.workspaces.list().await
    }

    // --- resource projection & registry ---

    /// Mirror one catalog resource into the local projection
    pub async fn upsert_resource(&self, resource: &Resource) -> Result<()> {
        self.resources.upsert(resource).await
    }

    pub async fn sync_resources(
        &self,
        resource_ids: &[i64],
        actor: i64,
        reason: &str,
    ) -> Result<SyncReport> {
        self.registry.sync_resources(resource_ids, actor, reason).await
    }

    pub async fn bind_resources(
        &self,
        workspace_id: i64,
        resource_ids: Option<&[i64]>,
        actor: i64,
    ) -> Result<SyncReport> {
        self.registry.bind_resources(workspace_id, resource_ids, actor).await
    }

    pub async fn prune_invalid_sources(&self, workspace_id: i64) -> Result<usize> {
        self.registry.prune_invalid_sources(workspace_id).await
    }

    pub async fn register_upload(
        &self,
        workspace_id: i64,
        request: UploadRequest,
        actor: i64,
    ) -> Result<Source> {
        self.registry.register_upload(workspace_id, request, actor).await
    }

    pub async fn publish_source(
        &self,
        workspace_id: i64,
        source_id: i64,
        resource_id: i64,
    ) -> Result<Source> {
        self.registry
            .publish_source(workspace_id, source_id, resource_id)
            .await
    }

    pub async fn list_sources(&self, workspace_id: i64) -> Result<Vec<Source>> {
        self.workspaces.require(workspace_id).await?;
        self.sources.list_active(workspace_id).await
    }

    // --- extraction jobs ---

    pub async fn start_extraction(
        &self,
        workspace_id: i64,
        mode: JobMode,
        source_ids: Option<Vec<i64>>,
    ) -> Result<ExtractionJob> {
        self.scheduler.start_job(workspace_id, mode, source_ids).await
    }

    pub async fn job_status(&self, workspace_id: i64, job_id: &str) -> Result<ExtractionJob> {
        self.scheduler
            .jobs()
            .get_for_workspace(workspace_id, job_id)
            .await?
            .ok_or_else(|| crate::Error::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self, workspace_id: i64, limit: i64) -> Result<Vec<ExtractionJob>> {
        self.workspaces.require(workspace_id).await?;
        self.scheduler.jobs().list_recent(workspace_id, limit).await
    }

    pub async fn job_errors(
        &self,
        workspace_id: i64,
        job_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<FailedSource>, i64)> {
        self.scheduler
            .job_errors(workspace_id, job_id, page, page_size)
            .await
    }

    /// Evaluate staleness and, when warranted, bind eligible resources and
    /// kick off a quick extraction pass.
    pub async fn bootstrap(&self, workspace_id: i64, force: bool) -> Result<BootstrapOutcome> {
        self.workspaces.require(workspace_id).await?;
        let decision = self.staleness.evaluate(workspace_id, force).await?;
        if !decision.run {
            return Ok(BootstrapOutcome {
                triggered: false,
                reason: decision.reason,
                job_id: None,
                active_job_id: None,
            });
        }

        if let Some(active) = self.scheduler.jobs().find_active(workspace_id).await? {
            return Ok(BootstrapOutcome {
                triggered: false,
                reason: decision.reason,
                job_id: None,
                active_job_id: Some(active.id),
            });
        }

        self.registry.bind_resources(workspace_id, None, 0).await?;
        let job = self
            .scheduler
            .start_job(workspace_id, JobMode::Quick, None)
            .await?;
        Ok(BootstrapOutcome {
            triggered: true,
            reason: decision.reason,
            job_id: Some(job.id),
            active_job_id: None,
        })
    }

    // --- graph / search / qa ---

    /// Graph query seeded from the configured defaults; callers override
    /// individual fields on top.
    pub fn default_graph_query(&self) -> GraphQuery {
        GraphQuery {
            dedupe: self.config.graph.canonical_dedupe,
            include_variants: self.config.graph.include_variants,
            ..GraphQuery::default()
        }
    }

    /// Assemble the graph, read-through cached per query
    pub async fn graph(&self, workspace_id: i64, query: &GraphQuery) -> Result<Graph> {
        self.workspaces.require(workspace_id).await?;
        let key = graph_cache_key(
            workspace_id,
            query.scope.as_str(),
            &query.q,
            query.limit,
            query.include_format_nodes,
            query.dedupe,
            query.include_variants,
        );
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(graph) = serde_json::from_value::<Graph>(cached) {
                debug!(key = %key, "Graph served from cache");
                return Ok(graph);
            }
        }

        let graph = self.assembler.build(workspace_id, query).await?;
        if let Ok(value) = serde_json::to_value(&graph) {
            self.cache.set(&key, value);
        }
        Ok(graph)
    }

    /// Rank visible sources against the query. With `filter` set, items
    /// scoring below the adaptive threshold are dropped from the response.
    pub async fn search(
        &self,
        workspace_id: i64,
        query: &str,
        top_k: usize,
        filter: bool,
    ) -> Result<SearchResponse> {
        self.workspaces.require(workspace_id).await?;
        let candidates = self.sources.search_visible(workspace_id, "", 200).await?;
        let mut response = self.ranker.rank(query, candidates, top_k).await?;
        if filter {
            response.retain_accepted();
        }
        Ok(response)
    }

    pub async fn ask(&self, workspace_id: i64, question: &str, actor: i64) -> Result<QaAnswer> {
        self.workspaces.require(workspace_id).await?;
        self.qa.ask(workspace_id, question, actor).await
    }

    pub async fn qa_logs(&self, workspace_id: i64, limit: i64) -> Result<Vec<QaLog>> {
        self.workspaces.require(workspace_id).await?;
        self.qa.logs().list(workspace_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use std::time::Duration;

    async fn service() -> GraphService {
        let db = Database::in_memory().await.expect("Failed to create test db");
        GraphService::new(db, Config::default()).expect("Failed to build service")
    }

    fn resource(id: i64) -> Resource {
        crate::infrastructure::resources::tests::sample_resource(id, "physics")
    }

    async fn wait_for_job(service: &GraphService, workspace_id: i64, job_id: &str) -> ExtractionJob {
        for _ in 0..100 {
            let job = service.job_status(workspace_id, job_id).await.unwrap();
            if !job.status.is_active() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Job {} never finished", job_id);
    }

    #[tokio::test]
    async fn test_end_to_end_bootstrap_graph_and_qa() {
        let service = service().await;
        let workspace = service
            .create_workspace("senior", "physics", "物理工作台", None, 1)
            .await
            .unwrap();

        service.upsert_resource(&resource(1)).await.unwrap();
        service.upsert_resource(&resource(2)).await.unwrap();

        let outcome = service.bootstrap(workspace.id, true).await.unwrap();
        assert!(outcome.triggered);
        assert_eq!(outcome.reason, "forced");
        let job = wait_for_job(&service, workspace.id, outcome.job_id.as_deref().unwrap()).await;
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.stats.processed_sources, 2);

        let graph = service
            .graph(workspace.id, &GraphQuery::default())
            .await
            .unwrap();
        assert_eq!(graph.stats.total_sources, 2);
        assert!(graph.stats.entity_nodes > 0);

        let results = service.search(workspace.id, "牛顿", 5, false).await.unwrap();
        assert!(!results.items.is_empty());

        let answer = service.ask(workspace.id, "牛顿运动定律", 1).await.unwrap();
        assert!(!answer.citations.is_empty());
        assert_eq!(service.qa_logs(workspace.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_graph_cache_read_through() {
        let service = service().await;
        let workspace = service
            .create_workspace("senior", "physics", "物理", None, 1)
            .await
            .unwrap();
        service.upsert_resource(&resource(1)).await.unwrap();
        service.bind_resources(workspace.id, None, 1).await.unwrap();

        let query = GraphQuery::default();
        let first = service.graph(workspace.id, &query).await.unwrap();
        assert_eq!(first.stats.total_sources, 1);

        // Cached response survives an out-of-band row change until invalidated
        service.upsert_resource(&resource(2)).await.unwrap();
        service.sync_resources(&[2], 1, "test").await.unwrap();
        let after_sync = service.graph(workspace.id, &query).await.unwrap();
        assert_eq!(after_sync.stats.total_sources, 2, "sync invalidates the cache");
    }

    #[tokio::test]
    async fn test_search_filter_drops_sub_threshold_items() {
        let service = service().await;
        let workspace = service
            .create_workspace("senior", "physics", "物理", None, 1)
            .await
            .unwrap();
        service.upsert_resource(&resource(1)).await.unwrap();
        service.upsert_resource(&resource(2)).await.unwrap();
        service.bind_resources(workspace.id, None, 1).await.unwrap();

        let full = service.search(workspace.id, "牛顿", 5, false).await.unwrap();
        let filtered = service.search(workspace.id, "牛顿", 5, true).await.unwrap();
        assert!(filtered.items.len() <= full.items.len());
        assert!(filtered
            .items
            .iter()
            .all(|item| item.score >= filtered.threshold));
    }

    #[tokio::test]
    async fn test_default_graph_query_follows_config() {
        let mut config = Config::default();
        config.graph.canonical_dedupe = false;
        config.graph.include_variants = false;

        let db = Database::in_memory().await.expect("Failed to create test db");
        let service = GraphService::new(db, config).expect("Failed to build service");

        let query = service.default_graph_query();
        assert!(!query.dedupe);
        assert!(!query.include_variants);
        assert!(query.include_format_nodes, "unrelated fields keep their defaults");
    }

    #[tokio::test]
    async fn test_bootstrap_fresh_workspace_skips() {
        let service = service().await;
        let workspace = service
            .create_workspace("senior", "physics", "物理", None, 1)
            .await
            .unwrap();

        let outcome = service.bootstrap(workspace.id, false).await.unwrap();
        assert!(!outcome.triggered);
        assert_eq!(outcome.reason, "no_sources");
        assert!(outcome.job_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_workspace_rejected() {
        let service = service().await;
        let err = service.graph(99, &GraphQuery::default()).await.unwrap_err();
        assert!(matches!(err, crate::Error::WorkspaceNotFound(99)));
    }
}
