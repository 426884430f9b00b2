//! Graph assembly
//!
//! Builds the workspace knowledge graph view: a chapter/section/format
//! hierarchy over canonical resource nodes, plus an entity/relation overlay
//! from extraction.

pub mod cache;

pub use cache::{graph_cache_key, workspace_cache_prefix, GraphCache, InMemoryGraphCache};

use crate::canonical::{self, VariantKind};
use crate::domain::{Resource, Source, SourceType};
use crate::error::Result;
use crate::infrastructure::{GraphStore, ResourceStore, SourceStore};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const UNKNOWN_CHAPTER_LABEL: &str = "未分类章节";
const UNASSIGNED_SECTION_LABEL: &str = "未分配小节";
const PRIVATE_BUCKET_LABEL: &str = "私有资料";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphScope {
    /// Approved catalog resources only
    Public,
    /// Catalog resources plus workspace uploads
    Mixed,
}

impl GraphScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse_or(value: &str, fallback: GraphScope) -> GraphScope {
        match value.trim().to_lowercase().as_str() {
            "public" => Self::Public,
            "mixed" => Self::Mixed,
            _ => fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphQuery {
    pub q: String,
    pub limit: i64,
    pub scope: GraphScope,
    pub include_format_nodes: bool,
    pub dedupe: bool,
    pub include_variants: bool,
}

impl Default for GraphQuery {
    fn default() -> Self {
        Self {
            q: String::new(),
            limit: 200,
            scope: GraphScope::Mixed,
            include_format_nodes: true,
            dedupe: true,
            include_variants: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub kind: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_sources: i64,
    pub public_sources: i64,
    pub private_sources: i64,
    pub embedded_resources: i64,
    pub chapter_nodes: i64,
    pub section_nodes: i64,
    pub format_nodes: i64,
    pub entity_nodes: i64,
    pub relation_edges: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub stats: GraphStats,
}

/// Where one source lands in the chapter/section hierarchy
pub struct Placement {
    pub chapter_node_id: String,
    pub chapter_label: String,
    pub section_key: String,
    pub section_node_id: String,
    pub section_label: String,
}

/// Hierarchy bucket for a source. Uploads and orphaned sources fall into
/// the private workspace bucket.
pub fn placement(source: &Source, resource: Option<&Resource>) -> Placement {
    match resource {
        Some(resource) if source.source_type == SourceType::Resource => {
            let chapter_part = resource
                .chapter_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let chapter_label = resource
                .chapter_title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(UNKNOWN_CHAPTER_LABEL)
                .to_string();
            let section_part = resource
                .section_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unassigned".to_string());
            let section_label = resource
                .section_name
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(UNASSIGNED_SECTION_LABEL)
                .to_string();
            let section_key = format!("{}:{}", chapter_part, section_part);
            Placement {
                chapter_node_id: format!("chapter:{}", chapter_part),
                chapter_label,
                section_node_id: format!("section:{}", section_key),
                section_key,
                section_label,
            }
        }
        _ => {
            let section_key = "private:workspace:unassigned".to_string();
            Placement {
                chapter_node_id: "chapter:private:workspace".to_string(),
                chapter_label: PRIVATE_BUCKET_LABEL.to_string(),
                section_node_id: format!("section:{}", section_key),
                section_key,
                section_label: UNASSIGNED_SECTION_LABEL.to_string(),
            }
        }
    }
}

/// Chinese display group for a source format
pub fn format_group_label(file_format: Option<&str>, resource_kind: &str) -> &'static str {
    let format = file_format.unwrap_or("").trim().to_lowercase();
    if format == "ppt" {
        return "课件";
    }
    match resource_kind.trim().to_lowercase().as_str() {
        "exercise" | "exam" => return "题目",
        "simulation" => return "仿真",
        _ => {}
    }
    match format.as_str() {
        "simulation" => "仿真",
        "video" => "视频",
        "image" => "图片",
        "audio" => "音频",
        "markdown" | "html" | "pdf" | "word" | "excel" => "文档",
        _ => "其他",
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

struct SourceGroup {
    key: String,
    members: Vec<Source>,
}

pub struct GraphAssembler {
    sources: SourceStore,
    resources: ResourceStore,
    pool: SqlitePool,
}

impl GraphAssembler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sources: SourceStore::new(pool.clone()),
            resources: ResourceStore::new(pool.clone()),
            pool,
        }
    }

    pub async fn build(&self, workspace_id: i64, query: &GraphQuery) -> Result<Graph> {
        let limit = query.limit.clamp(1, 500);
        let candidates = self
            .sources
            .search_visible(workspace_id, &query.q, limit)
            .await?;

        let resource_ids: Vec<i64> = candidates.iter().filter_map(|s| s.resource_id).collect();
        let resources: HashMap<i64, Resource> = self
            .resources
            .get_many(&resource_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let included: Vec<Source> = candidates
            .into_iter()
            .filter(|source| match source.source_type {
                SourceType::Resource => source
                    .resource_id
                    .and_then(|id| resources.get(&id))
                    .map(Resource::is_eligible)
                    .unwrap_or(false),
                SourceType::Upload => query.scope == GraphScope::Mixed,
            })
            .collect();

        let groups = group_sources(included, query.dedupe);

        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut seen_nodes = HashSet::new();
        let mut seen_edges = HashSet::new();
        let mut stats = GraphStats::default();

        let mut push_node = |nodes: &mut Vec<GraphNode>, node: GraphNode| -> bool {
            if seen_nodes.insert(node.id.clone()) {
                nodes.push(node);
                true
            } else {
                false
            }
        };
        let mut push_edge = |edges: &mut Vec<GraphEdge>, edge: GraphEdge| {
            if seen_edges.insert(edge.id.clone()) {
                edges.push(edge);
            }
        };

        let mut included_source_ids: Vec<i64> = Vec::new();

        for group in &groups {
            let primary = &group.members[0];
            let resource = primary.resource_id.and_then(|id| resources.get(&id));
            stats.total_sources += group.members.len() as i64;
            match primary.source_type {
                SourceType::Resource => stats.public_sources += group.members.len() as i64,
                SourceType::Upload => stats.private_sources += group.members.len() as i64,
            }
            included_source_ids.extend(group.members.iter().map(|s| s.id));

            let place = placement(primary, resource);
            if push_node(
                &mut nodes,
                GraphNode {
                    id: place.chapter_node_id.clone(),
                    label: place.chapter_label.clone(),
                    kind: "chapter".to_string(),
                    meta: serde_json::json!({}),
                },
            ) {
                stats.chapter_nodes += 1;
            }
            if push_node(
                &mut nodes,
                GraphNode {
                    id: place.section_node_id.clone(),
                    label: place.section_label.clone(),
                    kind: "section".to_string(),
                    meta: serde_json::json!({}),
                },
            ) {
                stats.section_nodes += 1;
            }
            push_edge(
                &mut edges,
                GraphEdge {
                    id: format!("{}->{}", place.chapter_node_id, place.section_node_id),
                    source: place.chapter_node_id.clone(),
                    target: place.section_node_id.clone(),
                    edge_type: "contains".to_string(),
                    weight: 1.0,
                },
            );

            let mut parent_id = place.section_node_id.clone();
            if query.include_format_nodes {
                let label = format_group_label(
                    primary.file_format.as_deref(),
                    resource.map(|r| r.resource_kind.as_str()).unwrap_or(""),
                );
                let format_node_id = format!("format:{}:{}", place.section_key, label);
                if push_node(
                    &mut nodes,
                    GraphNode {
                        id: format_node_id.clone(),
                        label: label.to_string(),
                        kind: "format".to_string(),
                        meta: serde_json::json!({}),
                    },
                ) {
                    stats.format_nodes += 1;
                }
                push_edge(
                    &mut edges,
                    GraphEdge {
                        id: format!("{}->{}", place.section_node_id, format_node_id),
                        source: place.section_node_id.clone(),
                        target: format_node_id.clone(),
                        edge_type: "contains".to_string(),
                        weight: 1.0,
                    },
                );
                parent_id = format_node_id;
            }

            let node_id = canonical::canonical_node_id(&group.key);
            let has_embedding = group.members.iter().any(|s| s.embedding.is_some())
                || resource.map(|r| r.embedding.is_some()).unwrap_or(false);
            if has_embedding {
                stats.embedded_resources += 1;
            }
            let mut meta = serde_json::json!({
                "canonical_key": group.key,
                "source_ids": group.members.iter().map(|s| s.id).collect::<Vec<_>>(),
                "auto_open_variant": auto_open(&group.members),
                "has_embedding": has_embedding,
            });
            if query.include_variants {
                meta["variants"] = serde_json::json!(
                    group
                        .members
                        .iter()
                        .enumerate()
                        .map(|(i, s)| {
                            serde_json::json!({
                                "source_id": s.id,
                                "variant_kind": s.variant_kind.as_str(),
                                "title": s.title,
                                "file_format": s.file_format,
                                "is_primary": i == 0,
                            })
                        })
                        .collect::<Vec<_>>()
                );
            }
            push_node(
                &mut nodes,
                GraphNode {
                    id: node_id.clone(),
                    label: primary.title.clone(),
                    kind: "resource".to_string(),
                    meta,
                },
            );
            push_edge(
                &mut edges,
                GraphEdge {
                    id: format!("{}->{}", parent_id, node_id),
                    source: parent_id,
                    target: node_id,
                    edge_type: "contains".to_string(),
                    weight: 1.0,
                },
            );
        }

        // Entity/relation overlay from extraction
        let entity_limit = 100i64.max(limit * 2);
        let relation_limit = 160i64.max(limit * 3);
        let entities = GraphStore::list_entities_for_sources(
            &self.pool,
            workspace_id,
            &included_source_ids,
            entity_limit,
        )
        .await?;
        let entity_ids: HashSet<i64> = entities.iter().map(|e| e.id).collect();

        for entity in &entities {
            if push_node(
                &mut nodes,
                GraphNode {
                    id: format!("entity:{}", entity.id),
                    label: entity.name.clone(),
                    kind: entity.entity_type.as_str().to_string(),
                    meta: serde_json::json!({
                        "confidence": round4(entity.confidence),
                        "description": entity.description,
                    }),
                },
            ) {
                stats.entity_nodes += 1;
            }
        }

        let relations = GraphStore::list_relations_for_sources(
            &self.pool,
            workspace_id,
            &included_source_ids,
            relation_limit,
        )
        .await?;
        for relation in relations
            .iter()
            .filter(|r| entity_ids.contains(&r.source_entity_id) && entity_ids.contains(&r.target_entity_id))
        {
            let id = format!(
                "entity:{}->entity:{}:{}",
                relation.source_entity_id,
                relation.target_entity_id,
                relation.relation_type.as_str()
            );
            if seen_edges.insert(id.clone()) {
                edges.push(GraphEdge {
                    id,
                    source: format!("entity:{}", relation.source_entity_id),
                    target: format!("entity:{}", relation.target_entity_id),
                    edge_type: relation.relation_type.as_str().to_string(),
                    weight: round4(relation.confidence),
                });
                stats.relation_edges += 1;
            }
        }

        debug!(
            workspace_id = workspace_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Graph assembled"
        );
        Ok(Graph { nodes, edges, stats })
    }
}

/// Group by canonical key preserving input priority order; the head of each
/// group is the primary variant.
fn group_sources(sources: Vec<Source>, dedupe: bool) -> Vec<SourceGroup> {
    let mut groups: Vec<SourceGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for source in sources {
        let key = source.resolved_canonical_key();
        if !dedupe {
            groups.push(SourceGroup {
                key: format!("{}:{}", key, source.id),
                members: vec![source],
            });
            continue;
        }
        match index.get(&key) {
            Some(&i) => groups[i].members.push(source),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(SourceGroup {
                    key,
                    members: vec![source],
                });
            }
        }
    }
    groups
}

fn auto_open(members: &[Source]) -> &'static str {
    let kinds: Vec<VariantKind> = members.iter().map(|s| s.variant_kind).collect();
    canonical::auto_open_variant(&kinds, members[0].file_format.as_deref()).as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceStatus;
    use crate::infrastructure::sources::tests::{sample_new_source, setup_workspace};
    use crate::storage::Database;

    async fn setup() -> (Database, i64) {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        (db, workspace_id)
    }

    async fn seed_resource(db: &Database, id: i64) {
        let resources = ResourceStore::new(db.pool().clone());
        resources
            .upsert(&crate::infrastructure::resources::tests::sample_resource(id, "physics"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_variants_collapse_to_one_node() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 42).await;
        let sources = SourceStore::new(db.pool().clone());

        // Three variants of the same resource: origin, derived, preview
        sources
            .insert(&sample_new_source(workspace_id, Some(42)))
            .await
            .unwrap();
        let mut derived = sample_new_source(workspace_id, Some(42));
        derived.variant_kind = VariantKind::Derived;
        derived.display_priority = VariantKind::Derived.priority();
        derived.object_key = Some("versions/mechanics.pptx".into());
        sources.insert(&derived).await.unwrap();

        let assembler = GraphAssembler::new(db.pool().clone());
        let graph = assembler
            .build(workspace_id, &GraphQuery::default())
            .await
            .unwrap();

        let resource_nodes: Vec<_> = graph.nodes.iter().filter(|n| n.kind == "resource").collect();
        assert_eq!(resource_nodes.len(), 1);
        let node = resource_nodes[0];
        assert_eq!(node.id, "canonical:resource_42");
        let variants = node.meta["variants"].as_array().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0]["variant_kind"], "origin");
        assert_eq!(variants[0]["is_primary"], true);
        // ppt with no preview variant opens the origin
        assert_eq!(node.meta["auto_open_variant"], "origin");
        assert_eq!(graph.stats.total_sources, 2);
    }

    #[tokio::test]
    async fn test_dedupe_off_keeps_separate_nodes() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 42).await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();
        let mut derived = sample_new_source(workspace_id, Some(42));
        derived.variant_kind = VariantKind::Derived;
        sources.insert(&derived).await.unwrap();

        let assembler = GraphAssembler::new(db.pool().clone());
        let query = GraphQuery {
            dedupe: false,
            ..Default::default()
        };
        let graph = assembler.build(workspace_id, &query).await.unwrap();
        let resource_nodes = graph.nodes.iter().filter(|n| n.kind == "resource").count();
        assert_eq!(resource_nodes, 2);
    }

    #[tokio::test]
    async fn test_scope_public_drops_uploads() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 1).await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(1))).await.unwrap();
        let mut upload = sample_new_source(workspace_id, None);
        upload.variant_kind = VariantKind::Upload;
        upload.object_key = Some("uploads/notes.md".into());
        sources.insert(&upload).await.unwrap();

        let assembler = GraphAssembler::new(db.pool().clone());

        let mixed = assembler.build(workspace_id, &GraphQuery::default()).await.unwrap();
        assert_eq!(mixed.stats.total_sources, 2);
        assert_eq!(mixed.stats.private_sources, 1);
        assert!(mixed.nodes.iter().any(|n| n.id == "chapter:private:workspace"));

        let public = assembler
            .build(
                workspace_id,
                &GraphQuery {
                    scope: GraphScope::Public,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(public.stats.total_sources, 1);
        assert_eq!(public.stats.private_sources, 0);
    }

    #[tokio::test]
    async fn test_hierarchy_and_format_nodes() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 42).await;
        let sources = SourceStore::new(db.pool().clone());
        sources.insert(&sample_new_source(workspace_id, Some(42))).await.unwrap();

        let assembler = GraphAssembler::new(db.pool().clone());
        let graph = assembler.build(workspace_id, &GraphQuery::default()).await.unwrap();

        // sample resource sits in chapter 1 / section 2 as a ppt
        assert!(graph.nodes.iter().any(|n| n.id == "chapter:1"));
        assert!(graph.nodes.iter().any(|n| n.id == "section:1:2"));
        assert!(graph.nodes.iter().any(|n| n.id == "format:1:2:课件"));
        assert!(graph
            .edges
            .iter()
            .any(|e| e.id == "chapter:1->section:1:2" && e.edge_type == "contains"));
        assert_eq!(graph.stats.chapter_nodes, 1);
        assert_eq!(graph.stats.format_nodes, 1);

        let flat = assembler
            .build(
                workspace_id,
                &GraphQuery {
                    include_format_nodes: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(flat.stats.format_nodes, 0);
        assert!(flat
            .edges
            .iter()
            .any(|e| e.source == "section:1:2" && e.target == "canonical:resource_42"));
    }

    #[tokio::test]
    async fn test_overlay_entities_and_relations() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 42).await;
        let sources = SourceStore::new(db.pool().clone());
        let source = sources
            .insert(&sample_new_source(workspace_id, Some(42)))
            .await
            .unwrap();

        // Extract so entities and relations exist
        let ai = crate::ai::AiClient::builder().api_key(None).build().unwrap();
        let engine = crate::extract::ExtractionEngine::new(
            crate::config::ExtractionConfig::default(),
            std::sync::Arc::new(ai),
        );
        let resource = crate::infrastructure::resources::tests::sample_resource(42, "physics");
        let mut conn = db.pool().acquire().await.unwrap();
        engine
            .rebuild_source(&mut conn, &source, Some(&resource), crate::domain::JobMode::Quick)
            .await
            .unwrap();
        drop(conn);

        let assembler = GraphAssembler::new(db.pool().clone());
        let graph = assembler.build(workspace_id, &GraphQuery::default()).await.unwrap();

        assert!(graph.stats.entity_nodes > 0);
        assert!(graph.stats.relation_edges > 0);
        let overlay_edge = graph
            .edges
            .iter()
            .find(|e| e.id.starts_with("entity:"))
            .unwrap();
        assert!(overlay_edge.weight >= 0.58);
        // Weight carries at most 4 decimals
        assert_eq!(overlay_edge.weight, round4(overlay_edge.weight));
    }

    #[test]
    fn test_format_group_labels() {
        assert_eq!(format_group_label(Some("ppt"), "courseware"), "课件");
        assert_eq!(format_group_label(Some("pdf"), "exercise"), "题目");
        assert_eq!(format_group_label(None, "exam"), "题目");
        assert_eq!(format_group_label(Some("video"), "courseware"), "视频");
        assert_eq!(format_group_label(Some("markdown"), ""), "文档");
        assert_eq!(format_group_label(Some("weird"), "unknown"), "其他");
        assert_eq!(format_group_label(None, "simulation"), "仿真");
    }

    #[tokio::test]
    async fn test_inactive_sources_excluded() {
        let (db, workspace_id) = setup().await;
        seed_resource(&db, 1).await;
        let sources = SourceStore::new(db.pool().clone());
        let mut inactive = sample_new_source(workspace_id, Some(1));
        inactive.status = SourceStatus::Inactive;
        sources.insert(&inactive).await.unwrap();

        let assembler = GraphAssembler::new(db.pool().clone());
        let graph = assembler.build(workspace_id, &GraphQuery::default()).await.unwrap();
        assert_eq!(graph.stats.total_sources, 0);
        assert!(graph.nodes.is_empty());
    }
}
