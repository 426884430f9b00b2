//! Source registry: keeps workspace sources in step with the resource catalog
//!
//! Sync is idempotent and field-diffed; rows are deactivated rather than
//! deleted so extraction history stays attached.

use crate::canonical::{self, VariantKind};
use crate::domain::{Resource, Source, SourceStatus, SourceType, Workspace};
use crate::error::Result;
use crate::graph::cache::{workspace_cache_prefix, GraphCache};
use crate::infrastructure::{NewSource, ResourceStore, SourceStore, WorkspaceStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on resources auto-bound into one workspace
pub const BIND_LIMIT: i64 = 260;

/// Outcome counters for one sync pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub requested: i64,
    pub created: i64,
    pub reactivated: i64,
    pub updated: i64,
    pub deactivated: i64,
    pub skipped: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SyncReport {
    fn changed(&self) -> bool {
        self.created + self.reactivated + self.updated + self.deactivated > 0
    }
}

/// Fields for registering an ad-hoc upload as a source
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub title: String,
    pub object_key: Option<String>,
    pub file_format: Option<String>,
    pub summary_text: Option<String>,
    pub tags: Vec<String>,
}

pub struct SourceRegistry {
    workspaces: WorkspaceStore,
    resources: ResourceStore,
    sources: SourceStore,
    cache: Arc<dyn GraphCache>,
}

impl SourceRegistry {
    pub fn new(
        workspaces: WorkspaceStore,
        resources: ResourceStore,
        sources: SourceStore,
        cache: Arc<dyn GraphCache>,
    ) -> Self {
        Self {
            workspaces,
            resources,
            sources,
            cache,
        }
    }

    /// Propagate catalog changes for a resource set into every workspace
    /// whose subject matches.
    pub async fn sync_resources(
        &self,
        resource_ids: &[i64],
        actor: i64,
        reason: &str,
    ) -> Result<SyncReport> {
        let ids = normalize_ids(resource_ids);
        let mut report = SyncReport {
            requested: ids.len() as i64,
            reason: Some(reason.to_string()),
            ..Default::default()
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let resources: HashMap<i64, Resource> = self
            .resources
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let workspaces = self.candidate_workspaces(resources.values()).await?;
        if workspaces.is_empty() {
            report.skipped = report.requested;
            return Ok(report);
        }

        let workspace_ids: Vec<i64> = workspaces.iter().map(|w| w.id).collect();
        let mut existing: HashMap<(i64, i64), Vec<Source>> = HashMap::new();
        for source in self
            .sources
            .list_resource_sources(&workspace_ids, &ids)
            .await?
        {
            if let Some(resource_id) = source.resource_id {
                existing
                    .entry((source.workspace_id, resource_id))
                    .or_default()
                    .push(source);
            }
        }

        for workspace in &workspaces {
            for resource_id in &ids {
                let resource = resources.get(resource_id);
                if let Some(resource) = resource {
                    if !workspace.accepts_subject(&resource.subject) {
                        continue;
                    }
                }

                let rows = existing
                    .remove(&(workspace.id, *resource_id))
                    .unwrap_or_default();
                self.sync_pair(workspace, *resource_id, resource, rows, actor, &mut report)
                    .await?;
            }
        }

        if report.changed() {
            // Sync spans workspaces, so the whole cache goes
            self.cache.invalidate_all();
        }
        info!(
            actor = actor,
            reason = %reason,
            created = report.created,
            updated = report.updated,
            deactivated = report.deactivated,
            "Resource sync finished"
        );
        Ok(report)
    }

    /// Reconcile one (workspace, resource) pair. `rows` arrive ordered
    /// most-recently-updated first; the head stays primary.
    async fn sync_pair(
        &self,
        workspace: &Workspace,
        resource_id: i64,
        resource: Option<&Resource>,
        rows: Vec<Source>,
        actor: i64,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut rows = rows.into_iter();
        let primary = rows.next();

        for duplicate in rows {
            if duplicate.is_active() {
                self.sources
                    .set_status(duplicate.id, SourceStatus::Inactive)
                    .await?;
                report.deactivated += 1;
                debug!(source_id = duplicate.id, "Duplicate source deactivated");
            }
        }

        let eligible = resource.map(Resource::is_eligible).unwrap_or(false);
        match (primary, eligible) {
            (Some(source), false) => {
                if source.is_active() {
                    self.sources
                        .set_status(source.id, SourceStatus::Inactive)
                        .await?;
                    report.deactivated += 1;
                } else {
                    report.skipped += 1;
                }
            }
            (None, false) => {
                report.skipped += 1;
            }
            (None, true) => {
                let resource = resource.ok_or(crate::Error::ResourceNotFound(resource_id))?;
                self.sources
                    .insert(&new_resource_source(workspace.id, resource, actor))
                    .await?;
                report.created += 1;
            }
            (Some(mut source), true) => {
                let resource = resource.ok_or(crate::Error::ResourceNotFound(resource_id))?;
                let reactivate = !source.is_active();
                let changed = apply_resource_fields(&mut source, resource);
                if reactivate {
                    source.status = SourceStatus::Ready;
                }
                if reactivate || changed {
                    self.sources.save(&source).await?;
                }
                if reactivate {
                    report.reactivated += 1;
                } else if changed {
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Deactivate resource-backed sources whose backing resource vanished or
    /// lost eligibility. Returns how many rows were pruned.
    pub async fn prune_invalid_sources(&self, workspace_id: i64) -> Result<usize> {
        let sources = self.sources.list_resource_backed(workspace_id).await?;
        let resource_ids: Vec<i64> = sources.iter().filter_map(|s| s.resource_id).collect();
        let resources: HashMap<i64, Resource> = self
            .resources
            .get_many(&resource_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut pruned = 0;
        for source in sources.iter().filter(|s| s.is_active()) {
            let valid = source
                .resource_id
                .and_then(|id| resources.get(&id))
                .map(Resource::is_eligible)
                .unwrap_or(false);
            if !valid {
                self.sources
                    .set_status(source.id, SourceStatus::Inactive)
                    .await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            self.cache
                .invalidate_prefix(&workspace_cache_prefix(workspace_id));
            info!(workspace_id = workspace_id, pruned = pruned, "Invalid sources pruned");
        }
        Ok(pruned)
    }

    /// Bind resources into a workspace; with no explicit ids, pick up to
    /// [`BIND_LIMIT`] eligible resources for the workspace subject.
    pub async fn bind_resources(
        &self,
        workspace_id: i64,
        resource_ids: Option<&[i64]>,
        actor: i64,
    ) -> Result<SyncReport> {
        let workspace = self.workspaces.require(workspace_id).await?;
        let ids = match resource_ids {
            Some(ids) => normalize_ids(ids),
            None => {
                self.resources
                    .eligible_ids_for_subject(&workspace.subject, BIND_LIMIT)
                    .await?
            }
        };
        self.sync_resources(&ids, actor, "bind").await
    }

    /// Register an ad-hoc upload as a ready source
    pub async fn register_upload(
        &self,
        workspace_id: i64,
        request: UploadRequest,
        actor: i64,
    ) -> Result<Source> {
        self.workspaces.require(workspace_id).await?;
        let title = canonical::clean_variant_title(
            Some(&request.title),
            request.object_key.as_deref(),
        );
        let source = self
            .sources
            .insert(&NewSource {
                workspace_id,
                source_type: SourceType::Upload,
                resource_id: None,
                title,
                object_key: request.object_key.clone(),
                file_format: request.file_format,
                summary_text: request.summary_text,
                tags: request.tags,
                embedding: None,
                status: SourceStatus::Ready,
                canonical_key: canonical::canonical_key(
                    None,
                    request.object_key.as_deref(),
                    Some(VariantKind::Upload),
                ),
                variant_kind: VariantKind::Upload,
                is_graph_visible: true,
                display_priority: VariantKind::Upload.priority(),
                created_by: actor,
            })
            .await?;

        self.cache
            .invalidate_prefix(&workspace_cache_prefix(workspace_id));
        Ok(source)
    }

    /// Reassign an upload to a newly approved catalog resource
    pub async fn publish_source(
        &self,
        workspace_id: i64,
        source_id: i64,
        resource_id: i64,
    ) -> Result<Source> {
        if resource_id <= 0 {
            return Err(crate::Error::InvalidInput(
                "resource_id must be positive".into(),
            ));
        }
        let mut source = self.sources.get_in_workspace(workspace_id, source_id).await?;
        self.resources
            .get(resource_id)
            .await?
            .ok_or(crate::Error::ResourceNotFound(resource_id))?;

        source.resource_id = Some(resource_id);
        source.status = SourceStatus::Published;
        source.canonical_key = canonical::canonical_key(
            Some(resource_id),
            source.object_key.as_deref(),
            Some(source.variant_kind),
        );
        self.sources.save(&source).await?;

        self.cache
            .invalidate_prefix(&workspace_cache_prefix(workspace_id));
        info!(source_id = source_id, resource_id = resource_id, "Source published");
        self.sources.get_in_workspace(workspace_id, source_id).await
    }

    /// Workspaces a resource set can land in. A blank-subject resource is
    /// global, so the whole workspace list is in play.
    async fn candidate_workspaces<'a>(
        &self,
        resources: impl Iterator<Item = &'a Resource>,
    ) -> Result<Vec<Workspace>> {
        let mut subjects = Vec::new();
        let mut any_global = false;
        for resource in resources {
            if resource.subject.trim().is_empty() {
                any_global = true;
            } else {
                subjects.push(resource.subject.clone());
            }
        }
        if any_global {
            self.workspaces.list().await
        } else {
            self.workspaces.list_for_subjects(&subjects).await
        }
    }
}

/// Positive, deduplicated, order-preserving
fn normalize_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .copied()
        .filter(|id| *id > 0 && seen.insert(*id))
        .collect()
}

fn desired_variant(resource: &Resource) -> VariantKind {
    canonical::guess_variant_kind(resource.object_key.as_deref(), resource.file_format.as_deref())
}

fn new_resource_source(workspace_id: i64, resource: &Resource, actor: i64) -> NewSource {
    let variant_kind = desired_variant(resource);
    NewSource {
        workspace_id,
        source_type: SourceType::Resource,
        resource_id: Some(resource.id),
        title: canonical::clean_variant_title(
            Some(&resource.title),
            resource.object_key.as_deref(),
        ),
        object_key: resource.object_key.clone(),
        file_format: resource.file_format.clone(),
        summary_text: resource.summary(),
        tags: resource.merged_tags(),
        embedding: resource.embedding.clone(),
        status: SourceStatus::Ready,
        canonical_key: canonical::canonical_key(
            Some(resource.id),
            resource.object_key.as_deref(),
            Some(variant_kind),
        ),
        variant_kind,
        is_graph_visible: variant_kind != VariantKind::PreviewPdf,
        display_priority: variant_kind.priority(),
        created_by: actor,
    }
}

/// Copy catalog fields onto an existing source; true when anything changed
fn apply_resource_fields(source: &mut Source, resource: &Resource) -> bool {
    let variant_kind = desired_variant(resource);
    let desired_title = canonical::clean_variant_title(
        Some(&resource.title),
        resource.object_key.as_deref(),
    );
    let desired_summary = resource.summary();
    let desired_tags = resource.merged_tags();
    let desired_key = canonical::canonical_key(
        Some(resource.id),
        resource.object_key.as_deref(),
        Some(variant_kind),
    );
    let desired_visible = variant_kind != VariantKind::PreviewPdf;
    let desired_priority = variant_kind.priority();

    let mut changed = false;
    let mut set = |differs: bool| {
        if differs {
            changed = true;
        }
        differs
    };

    if set(source.title != desired_title) {
        source.title = desired_title;
    }
    if set(source.object_key != resource.object_key) {
        source.object_key = resource.object_key.clone();
    }
    if set(source.file_format != resource.file_format) {
        source.file_format = resource.file_format.clone();
    }
    if set(source.summary_text != desired_summary) {
        source.summary_text = desired_summary;
    }
    if set(source.tags != desired_tags) {
        source.tags = desired_tags;
    }
    if set(source.embedding != resource.embedding) {
        source.embedding = resource.embedding.clone();
    }
    if set(source.canonical_key != desired_key) {
        source.canonical_key = desired_key;
    }
    if set(source.variant_kind != variant_kind) {
        source.variant_kind = variant_kind;
    }
    if set(source.is_graph_visible != desired_visible) {
        source.is_graph_visible = desired_visible;
    }
    if set(source.display_priority != desired_priority) {
        source.display_priority = desired_priority;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceStatus;
    use crate::graph::cache::InMemoryGraphCache;
    use crate::storage::Database;

    fn sample_resource(id: i64, subject: &str) -> Resource {
        crate::infrastructure::resources::tests::sample_resource(id, subject)
    }

    async fn setup() -> (Database, SourceRegistry, i64) {
        let db = Database::in_memory().await.expect("Failed to create test db");
        let pool = db.pool().clone();
        let workspaces = WorkspaceStore::new(pool.clone());
        let workspace = workspaces
            .create("senior", "physics", "物理工作台", None, 1)
            .await
            .unwrap();
        let registry = SourceRegistry::new(
            workspaces,
            ResourceStore::new(pool.clone()),
            SourceStore::new(pool.clone()),
            Arc::new(InMemoryGraphCache::default()),
        );
        (db, registry, workspace.id)
    }

    #[tokio::test]
    async fn test_sync_creates_then_noops() {
        let (db, registry, _workspace_id) = setup().await;
        let resources = ResourceStore::new(db.pool().clone());
        resources.upsert(&sample_resource(1, "physics")).await.unwrap();
        resources.upsert(&sample_resource(2, "physics")).await.unwrap();

        let first = registry.sync_resources(&[1, 2, 2, -5], 9, "test").await.unwrap();
        assert_eq!(first.requested, 2);
        assert_eq!(first.created, 2);

        // Unchanged catalog: a second pass is a pure no-op
        let second = registry.sync_resources(&[1, 2], 9, "test").await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_sync_field_diff_updates() {
        let (db, registry, workspace_id) = setup().await;
        let resources = ResourceStore::new(db.pool().clone());
        let mut resource = sample_resource(1, "physics");
        resources.upsert(&resource).await.unwrap();
        registry.sync_resources(&[1], 9, "test").await.unwrap();

        resource.title = "新标题".into();
        resources.upsert(&resource).await.unwrap();
        let report = registry.sync_resources(&[1], 9, "test").await.unwrap();
        assert_eq!(report.updated, 1);

        let sources = SourceStore::new(db.pool().clone());
        let active = sources.list_active(workspace_id).await.unwrap();
        assert_eq!(active[0].title, "新标题");
    }

    #[tokio::test]
    async fn test_sync_deactivates_ineligible_and_duplicates() {
        let (db, registry, workspace_id) = setup().await;
        let resources = ResourceStore::new(db.pool().clone());
        let sources = SourceStore::new(db.pool().clone());

        let mut resource = sample_resource(1, "physics");
        resources.upsert(&resource).await.unwrap();
        registry.sync_resources(&[1], 9, "test").await.unwrap();

        // A stray duplicate row for the same pair
        sources
            .insert(&crate::infrastructure::sources::tests::sample_new_source(
                workspace_id,
                Some(1),
            ))
            .await
            .unwrap();

        resource.status = ResourceStatus::Rejected;
        resources.upsert(&resource).await.unwrap();
        let report = registry.sync_resources(&[1], 9, "test").await.unwrap();
        assert_eq!(report.deactivated, 2);
        assert!(sources.list_active(workspace_id).await.unwrap().is_empty());

        // Eligibility restored: the primary comes back
        resource.status = ResourceStatus::Approved;
        resources.upsert(&resource).await.unwrap();
        let back = registry.sync_resources(&[1], 9, "test").await.unwrap();
        assert_eq!(back.reactivated, 1);
        assert_eq!(sources.list_active(workspace_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subject_scoping() {
        let (db, registry, workspace_id) = setup().await;
        let resources = ResourceStore::new(db.pool().clone());
        resources.upsert(&sample_resource(1, "chemistry")).await.unwrap();
        resources.upsert(&sample_resource(2, "")).await.unwrap();

        registry.sync_resources(&[1, 2], 9, "test").await.unwrap();
        let sources = SourceStore::new(db.pool().clone());
        let active = sources.list_active(workspace_id).await.unwrap();
        assert_eq!(active.len(), 1, "blank-subject resource is global");
        assert_eq!(active[0].resource_id, Some(2));
    }

    #[tokio::test]
    async fn test_bind_and_prune() {
        let (db, registry, workspace_id) = setup().await;
        let resources = ResourceStore::new(db.pool().clone());
        resources.upsert(&sample_resource(1, "physics")).await.unwrap();
        resources.upsert(&sample_resource(2, "physics")).await.unwrap();

        let report = registry.bind_resources(workspace_id, None, 9).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.reason.as_deref(), Some("bind"));

        let mut gone = sample_resource(2, "physics");
        gone.is_trashed = true;
        resources.upsert(&gone).await.unwrap();
        let pruned = registry.prune_invalid_sources(workspace_id).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(registry.prune_invalid_sources(workspace_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_then_publish() {
        let (db, registry, workspace_id) = setup().await;
        let upload = registry
            .register_upload(
                workspace_id,
                UploadRequest {
                    title: "  我的笔记  ".into(),
                    object_key: Some("uploads/notes.md".into()),
                    file_format: Some("markdown".into()),
                    summary_text: None,
                    tags: vec![],
                },
                9,
            )
            .await
            .unwrap();
        assert_eq!(upload.title, "我的笔记");
        assert_eq!(upload.variant_kind, VariantKind::Upload);
        assert!(upload.canonical_key.starts_with("object:"));

        let resources = ResourceStore::new(db.pool().clone());
        resources.upsert(&sample_resource(77, "physics")).await.unwrap();
        let published = registry
            .publish_source(workspace_id, upload.id, 77)
            .await
            .unwrap();
        assert_eq!(published.status, SourceStatus::Published);
        assert_eq!(published.canonical_key, "resource:77");
    }
}
