//! Resource projection store
//!
//! The catalog is owned by the embedding application; this store mirrors the
//! fields the registry, staleness detector and graph assembler read.

use crate::domain::{self, Resource, ResourceStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

/// SQLite store for the resource projection
#[derive(Clone)]
pub struct ResourceStore {
    pool: SqlitePool,
}

impl ResourceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh one projected resource row
    pub async fn upsert(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                id, title, description, subject, stage, tags, ai_tags, ai_summary,
                embedding, chapter_id, chapter_code, chapter_title, section_id,
                section_name, object_key, file_format, resource_kind, status,
                is_trashed, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                subject = excluded.subject,
                stage = excluded.stage,
                tags = excluded.tags,
                ai_tags = excluded.ai_tags,
                ai_summary = excluded.ai_summary,
                embedding = excluded.embedding,
                chapter_id = excluded.chapter_id,
                chapter_code = excluded.chapter_code,
                chapter_title = excluded.chapter_title,
                section_id = excluded.section_id,
                section_name = excluded.section_name,
                object_key = excluded.object_key,
                file_format = excluded.file_format,
                resource_kind = excluded.resource_kind,
                status = excluded.status,
                is_trashed = excluded.is_trashed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(resource.id)
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.subject)
        .bind(&resource.stage)
        .bind(super::to_json(&resource.tags)?)
        .bind(super::to_json(&resource.ai_tags)?)
        .bind(&resource.ai_summary)
        .bind(match &resource.embedding {
            Some(vector) => Some(super::to_json(vector)?),
            None => None,
        })
        .bind(resource.chapter_id)
        .bind(&resource.chapter_code)
        .bind(&resource.chapter_title)
        .bind(resource.section_id)
        .bind(&resource.section_name)
        .bind(&resource.object_key)
        .bind(&resource.file_format)
        .bind(&resource.resource_kind)
        .bind(resource.status.as_str())
        .bind(resource.is_trashed as i64)
        .bind(domain::to_rfc3339(resource.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_resource()).transpose()
    }

    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<Resource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT * FROM resources WHERE id IN ({}) ORDER BY id",
            super::placeholders(ids.len())
        );
        let mut builder = sqlx::query_as::<_, ResourceRow>(&query);
        for id in ids {
            builder = builder.bind(id);
        }
        let rows = builder.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_resource()).collect()
    }

    /// Eligible resource ids for a workspace subject, newest first.
    /// Resources without a subject are in scope for every workspace.
    pub async fn eligible_ids_for_subject(&self, subject: &str, limit: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM resources
            WHERE status = 'approved' AND is_trashed = 0
              AND (subject = '' OR subject = ?)
            ORDER BY updated_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(subject)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// How many resources backing a workspace's active sources changed after
    /// the cutoff. Drives the `resources_updated` staleness reason.
    pub async fn count_updated_since(
        &self,
        workspace_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM resources r
            JOIN sources s ON s.resource_id = r.id
            WHERE s.workspace_id = ? AND s.status != 'inactive' AND r.updated_at > ?
            "#,
        )
        .bind(workspace_id)
        .bind(domain::to_rfc3339(cutoff))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[derive(Debug, FromRow)]
struct ResourceRow {
    id: i64,
    title: String,
    description: Option<String>,
    subject: String,
    stage: String,
    tags: String,
    ai_tags: String,
    ai_summary: Option<String>,
    embedding: Option<String>,
    chapter_id: Option<i64>,
    chapter_code: Option<String>,
    chapter_title: Option<String>,
    section_id: Option<i64>,
    section_name: Option<String>,
    object_key: Option<String>,
    file_format: Option<String>,
    resource_kind: String,
    status: String,
    is_trashed: i64,
    updated_at: String,
}

impl ResourceRow {
    fn into_resource(self) -> Result<Resource> {
        let status = ResourceStatus::parse(&self.status)
            .ok_or_else(|| crate::Error::Other(format!("Invalid resource status: {}", self.status)))?;

        Ok(Resource {
            id: self.id,
            title: self.title,
            description: self.description,
            subject: self.subject,
            stage: self.stage,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            ai_tags: serde_json::from_str(&self.ai_tags).unwrap_or_default(),
            ai_summary: self.ai_summary,
            embedding: self
                .embedding
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            chapter_id: self.chapter_id,
            chapter_code: self.chapter_code,
            chapter_title: self.chapter_title,
            section_id: self.section_id,
            section_name: self.section_name,
            object_key: self.object_key,
            file_format: self.file_format,
            resource_kind: self.resource_kind,
            status,
            is_trashed: self.is_trashed != 0,
            updated_at: domain::parse_rfc3339(&self.updated_at)?,
        })
    }
}
