//! Workspace store

use crate::domain::{self, Workspace};
use crate::error::Result;
use sqlx::{FromRow, SqlitePool};
use tracing::info;

/// SQLite store for workspaces
#[derive(Clone)]
pub struct WorkspaceStore {
    pool: SqlitePool,
}

impl WorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        stage: &str,
        subject: &str,
        name: &str,
        description: Option<&str>,
        created_by: i64,
    ) -> Result<Workspace> {
        let now = domain::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO workspaces (stage, subject, name, description, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stage.trim())
        .bind(subject.trim())
        .bind(name.trim())
        .bind(description)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(workspace_id = id, subject = %subject, "Workspace created");

        self.get(id)
            .await?
            .ok_or_else(|| crate::Error::WorkspaceNotFound(id))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Workspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_workspace()).transpose()
    }

    /// Get a workspace, erroring when it does not exist
    pub async fn require(&self, id: i64) -> Result<Workspace> {
        self.get(id)
            .await?
            .ok_or(crate::Error::WorkspaceNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> =
            sqlx::query_as("SELECT * FROM workspaces ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_workspace()).collect()
    }

    /// Workspaces whose subject is in the given set; empty set means all
    pub async fn list_for_subjects(&self, subjects: &[String]) -> Result<Vec<Workspace>> {
        if subjects.is_empty() {
            return self.list().await;
        }
        let mut sorted: Vec<&String> = subjects.iter().collect();
        sorted.sort();
        sorted.dedup();

        let query = format!(
            "SELECT * FROM workspaces WHERE subject IN ({}) ORDER BY id",
            super::placeholders(sorted.len())
        );
        let mut builder = sqlx::query_as::<_, WorkspaceRow>(&query);
        for subject in sorted {
            builder = builder.bind(subject);
        }
        let rows = builder.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_workspace()).collect()
    }
}

#[derive(Debug, FromRow)]
struct WorkspaceRow {
    id: i64,
    stage: String,
    subject: String,
    name: String,
    description: Option<String>,
    created_by: i64,
    created_at: String,
    updated_at: String,
}

impl WorkspaceRow {
    fn into_workspace(self) -> Result<Workspace> {
        Ok(Workspace {
            id: self.id,
            stage: self.stage,
            subject: self.subject,
            name: self.name,
            description: self.description,
            created_by: self.created_by,
            created_at: domain::parse_rfc3339(&self.created_at)?,
            updated_at: domain::parse_rfc3339(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn setup_store() -> WorkspaceStore {
        let db = Database::in_memory().await.expect("Failed to create test db");
        WorkspaceStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = setup_store().await;
        let workspace = store
            .create("senior", "physics", "物理工作台", Some("力学"), 1)
            .await
            .unwrap();

        assert_eq!(workspace.subject, "physics");
        let fetched = store.get(workspace.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "物理工作台");
        assert_eq!(fetched.description.as_deref(), Some("力学"));
    }

    #[tokio::test]
    async fn test_require_missing_workspace() {
        let store = setup_store().await;
        let err = store.require(99).await.unwrap_err();
        assert!(matches!(err, crate::Error::WorkspaceNotFound(99)));
    }

    #[tokio::test]
    async fn test_list_for_subjects() {
        let store = setup_store().await;
        store.create("senior", "physics", "物理", None, 1).await.unwrap();
        store.create("senior", "chemistry", "化学", None, 1).await.unwrap();

        let all = store.list_for_subjects(&[]).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .list_for_subjects(&["physics".to_string(), "physics".to_string()])
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].subject, "physics");
    }
}
