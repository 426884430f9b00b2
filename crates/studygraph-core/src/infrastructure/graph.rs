//! Graph row store: chunks, entities, relations, evidence
//!
//! Write paths take `&mut SqliteConnection` so one source rebuild runs inside
//! a single caller-owned transaction; read paths take the pool.

use crate::domain::{self, Entity, EntityType, Evidence, Relation, RelationType, graph};
use crate::error::Result;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

/// Evidence content cap, in characters
const EVIDENCE_MAX_CHARS: usize = 2000;

/// Candidate fields for an entity upsert
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub description: Option<String>,
    pub confidence: f64,
    pub source_id: Option<i64>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct EntityUpsert {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RelationUpsert {
    pub id: i64,
    pub created: bool,
}

/// SQLite store for graph rows
pub struct GraphStore;

impl GraphStore {
    /// Upsert an entity by (workspace, type, canonical_name).
    ///
    /// Existing rows only ever improve: the description is backfilled when it
    /// was empty and the confidence is raised, never lowered.
    pub async fn upsert_entity(
        conn: &mut SqliteConnection,
        workspace_id: i64,
        new: &NewEntity,
    ) -> Result<EntityUpsert> {
        let canonical_name = graph::canonicalize_name(&new.name);

        let existing: Option<(i64, Option<String>, f64)> = sqlx::query_as(
            r#"
            SELECT id, description, confidence FROM entities
            WHERE workspace_id = ? AND entity_type = ? AND canonical_name = ?
            "#,
        )
        .bind(workspace_id)
        .bind(new.entity_type.as_str())
        .bind(&canonical_name)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((id, description, confidence)) = existing {
            let backfill_description = description.as_deref().unwrap_or("").trim().is_empty()
                && new
                    .description
                    .as_deref()
                    .is_some_and(|d| !d.trim().is_empty());
            let raise_confidence = new.confidence > confidence;

            if backfill_description || raise_confidence {
                sqlx::query(
                    "UPDATE entities SET description = ?, confidence = ?, updated_at = ? WHERE id = ?",
                )
                .bind(if backfill_description {
                    new.description.clone()
                } else {
                    description
                })
                .bind(confidence.max(new.confidence))
                .bind(domain::now_rfc3339())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            return Ok(EntityUpsert { id, created: false });
        }

        let now = domain::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO entities (
                workspace_id, entity_type, name, canonical_name, description,
                confidence, source_id, meta, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workspace_id)
        .bind(new.entity_type.as_str())
        .bind(&new.name)
        .bind(&canonical_name)
        .bind(&new.description)
        .bind(new.confidence)
        .bind(new.source_id)
        .bind(super::to_json(&new.meta)?)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(entity_id = id, name = %new.name, "Entity created");
        Ok(EntityUpsert { id, created: true })
    }

    /// Insert a relation unless one with the same identity exists.
    /// Candidates below the confidence gate are silently dropped.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_relation_gated(
        conn: &mut SqliteConnection,
        workspace_id: i64,
        source_entity_id: i64,
        target_entity_id: i64,
        relation_type: RelationType,
        confidence: f64,
        source_id: Option<i64>,
        gate: f64,
    ) -> Result<Option<RelationUpsert>> {
        if confidence < gate {
            return Ok(None);
        }

        let existing: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM relations
            WHERE workspace_id = ? AND source_entity_id = ? AND target_entity_id = ?
              AND relation_type = ? AND source_id IS ?
            "#,
        )
        .bind(workspace_id)
        .bind(source_entity_id)
        .bind(target_entity_id)
        .bind(relation_type.as_str())
        .bind(source_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((id,)) = existing {
            return Ok(Some(RelationUpsert { id, created: false }));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO relations (
                workspace_id, source_entity_id, target_entity_id, relation_type,
                confidence, source_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workspace_id)
        .bind(source_entity_id)
        .bind(target_entity_id)
        .bind(relation_type.as_str())
        .bind(confidence)
        .bind(source_id)
        .bind(domain::now_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(Some(RelationUpsert {
            id: result.last_insert_rowid(),
            created: true,
        }))
    }

    pub async fn insert_evidence(
        conn: &mut SqliteConnection,
        workspace_id: i64,
        source_id: i64,
        chunk_id: Option<i64>,
        content: &str,
        score: f64,
        meta: &serde_json::Value,
    ) -> Result<i64> {
        let content: String = content.chars().take(EVIDENCE_MAX_CHARS).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO evidences (workspace_id, source_id, chunk_id, content, score, meta, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workspace_id)
        .bind(source_id)
        .bind(chunk_id)
        .bind(&content)
        .bind(score)
        .bind(super::to_json(meta)?)
        .bind(domain::now_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn link_relation_evidence(
        conn: &mut SqliteConnection,
        relation_id: i64,
        evidence_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO relation_evidences (relation_id, evidence_id) VALUES (?, ?)",
        )
        .bind(relation_id)
        .bind(evidence_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn insert_chunk(
        conn: &mut SqliteConnection,
        source_id: i64,
        chunk_index: i64,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chunks (source_id, chunk_index, content, embedding, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_id)
        .bind(chunk_index)
        .bind(content)
        .bind(match embedding {
            Some(vector) => Some(super::to_json(&vector)?),
            None => None,
        })
        .bind(domain::now_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Delete every extraction artifact tied to one source, FK-safe order:
    /// join rows first, then evidence and relations, then chunks.
    pub async fn cleanup_source_artifacts(
        conn: &mut SqliteConnection,
        source_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM relation_evidences WHERE evidence_id IN (SELECT id FROM evidences WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "DELETE FROM relation_evidences WHERE relation_id IN (SELECT id FROM relations WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM evidences WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM relations WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *conn)
            .await?;

        debug!(source_id = source_id, "Extraction artifacts cleaned up");
        Ok(())
    }

    /// Overlay entities tied to an included source set
    pub async fn list_entities_for_sources(
        pool: &SqlitePool,
        workspace_id: i64,
        source_ids: &[i64],
        limit: i64,
    ) -> Result<Vec<Entity>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT * FROM entities
            WHERE workspace_id = ? AND source_id IN ({})
            ORDER BY confidence DESC, id
            LIMIT ?
            "#,
            super::placeholders(source_ids.len())
        );
        let mut builder = sqlx::query_as::<_, EntityRow>(&query).bind(workspace_id);
        for id in source_ids {
            builder = builder.bind(id);
        }
        let rows = builder.bind(limit).fetch_all(pool).await?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    /// Overlay relations whose producing source is in the included set
    pub async fn list_relations_for_sources(
        pool: &SqlitePool,
        workspace_id: i64,
        source_ids: &[i64],
        limit: i64,
    ) -> Result<Vec<Relation>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT * FROM relations
            WHERE workspace_id = ? AND source_id IN ({})
            ORDER BY confidence DESC, id
            LIMIT ?
            "#,
            super::placeholders(source_ids.len())
        );
        let mut builder = sqlx::query_as::<_, RelationRow>(&query).bind(workspace_id);
        for id in source_ids {
            builder = builder.bind(id);
        }
        let rows = builder.bind(limit).fetch_all(pool).await?;

        rows.into_iter().map(|r| r.into_relation()).collect()
    }

    pub async fn relations_for_source(pool: &SqlitePool, source_id: i64) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            "SELECT * FROM relations WHERE source_id = ? ORDER BY confidence DESC, id",
        )
        .bind(source_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(|r| r.into_relation()).collect()
    }

    /// Entities referenced by a relation set
    pub async fn entities_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT * FROM entities WHERE id IN ({}) ORDER BY id",
            super::placeholders(ids.len())
        );
        let mut builder = sqlx::query_as::<_, EntityRow>(&query);
        for id in ids {
            builder = builder.bind(id);
        }
        let rows = builder.fetch_all(pool).await?;

        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    /// Best evidence excerpt for a source, used in Q&A citations
    pub async fn top_evidence_for_source(
        pool: &SqlitePool,
        source_id: i64,
    ) -> Result<Option<Evidence>> {
        let row: Option<EvidenceRow> = sqlx::query_as(
            "SELECT * FROM evidences WHERE source_id = ? ORDER BY score DESC, id LIMIT 1",
        )
        .bind(source_id)
        .fetch_optional(pool)
        .await?;

        row.map(|r| r.into_evidence()).transpose()
    }

    /// (chunks, entities, relations, evidences) counts for one source
    pub async fn count_artifacts(pool: &SqlitePool, source_id: i64) -> Result<(i64, i64, i64, i64)> {
        let (chunks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await?;
        let (entities,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await?;
        let (relations,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM relations WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(pool)
                .await?;
        let (evidences,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM evidences WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(pool)
                .await?;
        Ok((chunks, entities, relations, evidences))
    }

    pub async fn min_relation_confidence(pool: &SqlitePool, workspace_id: i64) -> Result<Option<f64>> {
        let (min,): (Option<f64>,) =
            sqlx::query_as("SELECT MIN(confidence) FROM relations WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_one(pool)
                .await?;
        Ok(min)
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: i64,
    workspace_id: i64,
    entity_type: String,
    name: String,
    canonical_name: String,
    description: Option<String>,
    confidence: f64,
    source_id: Option<i64>,
    meta: String,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        let entity_type = EntityType::parse(&self.entity_type)
            .ok_or_else(|| crate::Error::Other(format!("Invalid entity type: {}", self.entity_type)))?;

        Ok(Entity {
            id: self.id,
            workspace_id: self.workspace_id,
            entity_type,
            name: self.name,
            canonical_name: self.canonical_name,
            description: self.description,
            confidence: self.confidence,
            source_id: self.source_id,
            meta: serde_json::from_str(&self.meta).unwrap_or_default(),
            created_at: domain::parse_rfc3339(&self.created_at)?,
            updated_at: domain::parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    id: i64,
    workspace_id: i64,
    source_entity_id: i64,
    target_entity_id: i64,
    relation_type: String,
    confidence: f64,
    source_id: Option<i64>,
    created_at: String,
}

impl RelationRow {
    fn into_relation(self) -> Result<Relation> {
        let relation_type = RelationType::parse(&self.relation_type).ok_or_else(|| {
            crate::Error::Other(format!("Invalid relation type: {}", self.relation_type))
        })?;

        Ok(Relation {
            id: self.id,
            workspace_id: self.workspace_id,
            source_entity_id: self.source_entity_id,
            target_entity_id: self.target_entity_id,
            relation_type,
            confidence: self.confidence,
            source_id: self.source_id,
            created_at: domain::parse_rfc3339(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct EvidenceRow {
    id: i64,
    workspace_id: i64,
    source_id: i64,
    chunk_id: Option<i64>,
    content: String,
    score: f64,
    meta: String,
    created_at: String,
}

impl EvidenceRow {
    fn into_evidence(self) -> Result<Evidence> {
        Ok(Evidence {
            id: self.id,
            workspace_id: self.workspace_id,
            source_id: self.source_id,
            chunk_id: self.chunk_id,
            content: self.content,
            score: self.score,
            meta: serde_json::from_str(&self.meta).unwrap_or_default(),
            created_at: domain::parse_rfc3339(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sources::tests::{sample_new_source, setup_workspace};
    use crate::infrastructure::SourceStore;
    use crate::storage::Database;

    async fn setup() -> (Database, i64, i64) {
        let db = Database::in_memory().await.unwrap();
        let workspace_id = setup_workspace(db.pool()).await;
        let source = SourceStore::new(db.pool().clone())
            .insert(&sample_new_source(workspace_id, Some(42)))
            .await
            .unwrap();
        (db, workspace_id, source.id)
    }

    fn entity(name: &str, confidence: f64, source_id: i64) -> NewEntity {
        NewEntity {
            entity_type: EntityType::KnowledgePoint,
            name: name.into(),
            description: None,
            confidence,
            source_id: Some(source_id),
            meta: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_entity_upsert_improves_but_never_degrades() {
        let (db, workspace_id, source_id) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let mut candidate = entity("牛顿第二定律", 0.75, source_id);
        let first = GraphStore::upsert_entity(&mut conn, workspace_id, &candidate)
            .await
            .unwrap();
        assert!(first.created);

        // Lower confidence and a description: only the description lands
        candidate.confidence = 0.50;
        candidate.description = Some("F = ma".into());
        let second = GraphStore::upsert_entity(&mut conn, workspace_id, &candidate)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);
        drop(conn);

        let (description, confidence): (Option<String>, f64) =
            sqlx::query_as("SELECT description, confidence FROM entities WHERE id = ?")
                .bind(first.id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(description.as_deref(), Some("F = ma"));
        assert_eq!(confidence, 0.75);
    }

    #[tokio::test]
    async fn test_entity_names_canonicalized() {
        let (db, workspace_id, source_id) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let first = GraphStore::upsert_entity(&mut conn, workspace_id, &entity(" F = MA ", 0.6, source_id))
            .await
            .unwrap();
        let second = GraphStore::upsert_entity(&mut conn, workspace_id, &entity("f = ma", 0.6, source_id))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(!second.created);
    }

    #[tokio::test]
    async fn test_relation_gate_blocks_low_confidence() {
        let (db, workspace_id, source_id) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let a = GraphStore::upsert_entity(&mut conn, workspace_id, &entity("甲", 0.8, source_id))
            .await
            .unwrap();
        let b = GraphStore::upsert_entity(&mut conn, workspace_id, &entity("乙", 0.8, source_id))
            .await
            .unwrap();

        let dropped = GraphStore::insert_relation_gated(
            &mut conn, workspace_id, a.id, b.id, RelationType::RelatedTo, 0.50, Some(source_id), 0.58,
        )
        .await
        .unwrap();
        assert!(dropped.is_none());

        let kept = GraphStore::insert_relation_gated(
            &mut conn, workspace_id, a.id, b.id, RelationType::RelatedTo, 0.76, Some(source_id), 0.58,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(kept.created);

        // Same identity: deduplicated
        let again = GraphStore::insert_relation_gated(
            &mut conn, workspace_id, a.id, b.id, RelationType::RelatedTo, 0.90, Some(source_id), 0.58,
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!again.created);
        assert_eq!(again.id, kept.id);
        drop(conn);

        let min = GraphStore::min_relation_confidence(db.pool(), workspace_id)
            .await
            .unwrap()
            .unwrap();
        assert!(min >= 0.58);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_in_fk_safe_order() {
        let (db, workspace_id, source_id) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let chunk_id = GraphStore::insert_chunk(&mut conn, source_id, 0, "内容", None)
            .await
            .unwrap();
        let a = GraphStore::upsert_entity(&mut conn, workspace_id, &entity("甲", 0.8, source_id))
            .await
            .unwrap();
        let b = GraphStore::upsert_entity(&mut conn, workspace_id, &entity("乙", 0.8, source_id))
            .await
            .unwrap();
        let relation = GraphStore::insert_relation_gated(
            &mut conn, workspace_id, a.id, b.id, RelationType::Contains, 0.94, Some(source_id), 0.58,
        )
        .await
        .unwrap()
        .unwrap();
        let evidence_id = GraphStore::insert_evidence(
            &mut conn,
            workspace_id,
            source_id,
            Some(chunk_id),
            "证据",
            0.82,
            &serde_json::json!({"fact": "contains"}),
        )
        .await
        .unwrap();
        GraphStore::link_relation_evidence(&mut conn, relation.id, evidence_id)
            .await
            .unwrap();

        GraphStore::cleanup_source_artifacts(&mut conn, source_id)
            .await
            .unwrap();
        drop(conn);

        let (chunks, _entities, relations, evidences) =
            GraphStore::count_artifacts(db.pool(), source_id).await.unwrap();
        assert_eq!((chunks, relations, evidences), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_evidence_content_capped() {
        let (db, workspace_id, source_id) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let long = "很".repeat(3000);
        GraphStore::insert_evidence(&mut conn, workspace_id, source_id, None, &long, 0.7, &serde_json::json!({}))
            .await
            .unwrap();
        drop(conn);

        let evidence = GraphStore::top_evidence_for_source(db.pool(), source_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(evidence.content.chars().count(), 2000);
    }
}
