//! Source store

use crate::canonical::VariantKind;
use crate::domain::{self, Source, SourceStatus, SourceType};
use crate::error::Result;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

/// Fields required to create a source row
#[derive(Debug, Clone)]
pub struct NewSource {
    pub workspace_id: i64,
    pub source_type: SourceType,
    pub resource_id: Option<i64>,
    pub title: String,
    pub object_key: Option<String>,
    pub file_format: Option<String>,
    pub summary_text: Option<String>,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub status: SourceStatus,
    pub canonical_key: String,
    pub variant_kind: VariantKind,
    pub is_graph_visible: bool,
    pub display_priority: i64,
    pub created_by: i64,
}

/// SQLite store for sources
#[derive(Clone)]
pub struct SourceStore {
    pool: SqlitePool,
}

impl SourceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: &NewSource) -> Result<Source> {
        let now = domain::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO sources (
                workspace_id, source_type, resource_id, title, object_key,
                file_format, summary_text, tags, embedding, status,
                canonical_key, variant_kind, is_graph_visible, display_priority,
                created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.workspace_id)
        .bind(new.source_type.as_str())
        .bind(new.resource_id)
        .bind(&new.title)
        .bind(&new.object_key)
        .bind(&new.file_format)
        .bind(&new.summary_text)
        .bind(super::to_json(&new.tags)?)
        .bind(match &new.embedding {
            Some(vector) => Some(super::to_json(vector)?),
            None => None,
        })
        .bind(new.status.as_str())
        .bind(&new.canonical_key)
        .bind(new.variant_kind.as_str())
        .bind(new.is_graph_visible as i64)
        .bind(new.display_priority)
        .bind(new.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(source_id = id, workspace_id = new.workspace_id, "Source created");

        self.get(id).await?.ok_or(crate::Error::SourceNotFound(id))
    }

    /// Persist every synced field of an existing source and touch updated_at
    pub async fn save(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sources SET
                source_type = ?, resource_id = ?, title = ?, object_key = ?,
                file_format = ?, summary_text = ?, tags = ?, embedding = ?,
                status = ?, canonical_key = ?, variant_kind = ?,
                is_graph_visible = ?, display_priority = ?, created_by = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(source.source_type.as_str())
        .bind(source.resource_id)
        .bind(&source.title)
        .bind(&source.object_key)
        .bind(&source.file_format)
        .bind(&source.summary_text)
        .bind(super::to_json(&source.tags)?)
        .bind(match &source.embedding {
            Some(vector) => Some(super::to_json(vector)?),
            None => None,
        })
        .bind(source.status.as_str())
        .bind(&source.canonical_key)
        .bind(source.variant_kind.as_str())
        .bind(source.is_graph_visible as i64)
        .bind(source.display_priority)
        .bind(source.created_by)
        .bind(domain::now_rfc3339())
        .bind(source.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_source()).transpose()
    }

    pub async fn get_in_workspace(&self, workspace_id: i64, id: i64) -> Result<Source> {
        let row: Option<SourceRow> =
            sqlx::query_as("SELECT * FROM sources WHERE id = ? AND workspace_id = ?")
                .bind(id)
                .bind(workspace_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_source())
            .transpose()?
            .ok_or(crate::Error::SourceNotFound(id))
    }

    /// All non-inactive sources of a workspace, stable order
    pub async fn list_active(&self, workspace_id: i64) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT * FROM sources WHERE workspace_id = ? AND status != 'inactive' ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }

    pub async fn list_all(&self, workspace_id: i64) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> =
            sqlx::query_as("SELECT * FROM sources WHERE workspace_id = ? ORDER BY id")
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }

    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<Source>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT * FROM sources WHERE id IN ({}) ORDER BY id",
            super::placeholders(ids.len())
        );
        let mut builder = sqlx::query_as::<_, SourceRow>(&query);
        for id in ids {
            builder = builder.bind(id);
        }
        let rows = builder.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }

    /// Resource-backed source rows for a workspace/resource cross product,
    /// most recently updated first so sync can keep the freshest duplicate.
    pub async fn list_resource_sources(
        &self,
        workspace_ids: &[i64],
        resource_ids: &[i64],
    ) -> Result<Vec<Source>> {
        if workspace_ids.is_empty() || resource_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT * FROM sources
            WHERE workspace_id IN ({}) AND resource_id IN ({}) AND source_type = 'resource'
            ORDER BY updated_at DESC, id DESC
            "#,
            super::placeholders(workspace_ids.len()),
            super::placeholders(resource_ids.len()),
        );
        let mut builder = sqlx::query_as::<_, SourceRow>(&query);
        for id in workspace_ids {
            builder = builder.bind(id);
        }
        for id in resource_ids {
            builder = builder.bind(id);
        }
        let rows = builder.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }

    /// Resource-backed sources of one workspace (any status), for pruning
    pub async fn list_resource_backed(&self, workspace_id: i64) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT * FROM sources
            WHERE workspace_id = ? AND source_type = 'resource' AND resource_id IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }

    pub async fn set_status(&self, id: i64, status: SourceStatus) -> Result<()> {
        sqlx::query("UPDATE sources SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(domain::now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write an embedding on the caller's connection so extraction can
    /// backfill it inside the rebuild transaction
    pub async fn write_embedding(
        conn: &mut SqliteConnection,
        id: i64,
        vector: &[f32],
    ) -> Result<()> {
        sqlx::query("UPDATE sources SET embedding = ?, updated_at = ? WHERE id = ?")
            .bind(super::to_json(&vector)?)
            .bind(domain::now_rfc3339())
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Active, graph-visible sources matching a free-text filter.
    /// Preview PDFs never appear as their own node.
    pub async fn search_visible(
        &self,
        workspace_id: i64,
        q: &str,
        limit: i64,
    ) -> Result<Vec<Source>> {
        let pattern = format!("%{}%", q.trim().to_lowercase());
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT * FROM sources
            WHERE workspace_id = ?
              AND status != 'inactive'
              AND is_graph_visible = 1
              AND variant_kind != 'preview_pdf'
              AND (? = '%%'
                   OR lower(title) LIKE ?
                   OR lower(coalesce(summary_text, '')) LIKE ?
                   OR lower(tags) LIKE ?)
            ORDER BY display_priority DESC, updated_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(workspace_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_source()).collect()
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: i64,
    workspace_id: i64,
    source_type: String,
    resource_id: Option<i64>,
    title: String,
    object_key: Option<String>,
    file_format: Option<String>,
    summary_text: Option<String>,
    tags: String,
    embedding: Option<String>,
    status: String,
    canonical_key: String,
    variant_kind: String,
    is_graph_visible: i64,
    display_priority: i64,
    created_by: i64,
    created_at: String,
    updated_at: String,
}

impl SourceRow {
    fn into_source(self) -> Result<Source> {
        let source_type = SourceType::parse(&self.source_type)
            .ok_or_else(|| crate::Error::Other(format!("Invalid source type: {}", self.source_type)))?;
        let status = SourceStatus::parse(&self.status)
            .ok_or_else(|| crate::Error::Other(format!("Invalid source status: {}", self.status)))?;

        Ok(Source {
            id: self.id,
            workspace_id: self.workspace_id,
            source_type,
            resource_id: self.resource_id,
            title: self.title,
            object_key: self.object_key,
            file_format: self.file_format,
            summary_text: self.summary_text,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            embedding: self
                .embedding
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            status,
            canonical_key: self.canonical_key,
            variant_kind: VariantKind::parse_or(&self.variant_kind, VariantKind::Upload),
            is_graph_visible: self.is_graph_visible != 0,
            display_priority: self.display_priority,
            created_by: self.created_by,
            created_at: domain::parse_rfc3339(&self.created_at)?,
            updated_at: domain::parse_rfc3339(&self.updated_at)?,
        })
    }
}
