//! Append-only Q&A audit log

use crate::domain::{self};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

/// One answered question, with the citations and highlight it shipped with
#[derive(Debug, Clone, serde::Serialize)]
pub struct QaLog {
    pub id: i64,
    pub workspace_id: i64,
    pub question: String,
    pub answer: String,
    pub citations: serde_json::Value,
    pub highlight: serde_json::Value,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

/// SQLite store for the Q&A log. Insert and list only; rows are never
/// updated or deleted.
#[derive(Clone)]
pub struct QaLogStore {
    pool: SqlitePool,
}

impl QaLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        workspace_id: i64,
        question: &str,
        answer: &str,
        citations: &serde_json::Value,
        highlight: &serde_json::Value,
        created_by: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO qa_logs (workspace_id, question, answer, citations, highlight, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workspace_id)
        .bind(question)
        .bind(answer)
        .bind(super::to_json(citations)?)
        .bind(super::to_json(highlight)?)
        .bind(created_by)
        .bind(domain::now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Newest entries first
    pub async fn list(&self, workspace_id: i64, limit: i64) -> Result<Vec<QaLog>> {
        let limit = limit.clamp(1, 200);
        let rows: Vec<QaLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM qa_logs
            WHERE workspace_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_log()).collect()
    }
}

#[derive(Debug, FromRow)]
struct QaLogRow {
    id: i64,
    workspace_id: i64,
    question: String,
    answer: String,
    citations: String,
    highlight: String,
    created_by: i64,
    created_at: String,
}

impl QaLogRow {
    fn into_log(self) -> Result<QaLog> {
        Ok(QaLog {
            id: self.id,
            workspace_id: self.workspace_id,
            question: self.question,
            answer: self.answer,
            citations: serde_json::from_str(&self.citations).unwrap_or_default(),
            highlight: serde_json::from_str(&self.highlight).unwrap_or_default(),
            created_by: self.created_by,
            created_at: domain::parse_rfc3339(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sources::tests::setup_workspace;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_insert_and_list_newest_first() {
        let db = Database::in_memory().await.expect("Failed to create test db");
        let workspace_id = setup_workspace(db.pool()).await;
        let store = QaLogStore::new(db.pool().clone());

        for i in 0..3 {
            store
                .insert(
                    workspace_id,
                    &format!("问题 {}", i),
                    "回答",
                    &serde_json::json!([{"source_id": i}]),
                    &serde_json::json!({"nodes": [], "edges": []}),
                    1,
                )
                .await
                .unwrap();
        }

        let logs = store.list(workspace_id, 2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].question, "问题 2");
        assert_eq!(logs[0].citations[0]["source_id"], 2);
    }
}
