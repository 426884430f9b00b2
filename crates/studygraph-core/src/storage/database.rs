//! SQLite pool wrapper
//!
//! Opens the studygraph database in WAL mode with foreign keys on and runs
//! pending migrations unless told not to.

use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives when no path is configured
pub fn default_database_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("studygraph").join("studygraph.db"),
        None => PathBuf::from("studygraph.db"),
    }
}

/// How to open the database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub auto_migrate: bool,
    in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            in_memory: false,
        }
    }
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// In-memory database for tests. Single connection, since each SQLite
    /// in-memory connection is its own database.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            max_connections: 1,
            auto_migrate: true,
            in_memory: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }
}

/// Shared handle over the connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let options = if config.in_memory {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        };
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {:?}", config.path))?;

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    pub async fn default() -> Result<Self> {
        Self::new(DatabaseConfig::default()).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to run database migrations")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_migrates() {
        let db = Database::in_memory().await.expect("Failed to create in-memory database");
        db.health_check().await.expect("Health check failed");

        let status = db.migration_status().await.expect("Failed to get migration status");
        assert!(!status.needs_migration);
        assert_eq!(status.current_version, migrations::CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DatabaseConfig::with_path("/tmp/studygraph-test.db")
            .max_connections(10)
            .no_migrate();

        assert_eq!(config.path, PathBuf::from("/tmp/studygraph-test.db"));
        assert_eq!(config.max_connections, 10);
        assert!(!config.auto_migrate);
    }

    #[tokio::test]
    async fn test_workspace_delete_cascades_to_sources() {
        let db = Database::in_memory().await.expect("Failed to create database");

        sqlx::query(
            "INSERT INTO workspaces (name, subject, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind("物理工作台")
        .bind("physics")
        .bind("2026-01-01T00:00:00Z")
        .bind("2026-01-01T00:00:00Z")
        .execute(db.pool())
        .await
        .expect("Failed to insert workspace");

        sqlx::query(
            "INSERT INTO sources (workspace_id, title, created_at, updated_at) VALUES (1, ?, ?, ?)",
        )
        .bind("力学讲义")
        .bind("2026-01-01T00:00:00Z")
        .bind("2026-01-01T00:00:00Z")
        .execute(db.pool())
        .await
        .expect("Failed to insert source");

        sqlx::query("DELETE FROM workspaces WHERE id = 1")
            .execute(db.pool())
            .await
            .expect("Failed to delete workspace");

        let orphan: Option<(String,)> =
            sqlx::query_as("SELECT title FROM sources WHERE workspace_id = 1")
                .fetch_optional(db.pool())
                .await
                .expect("Failed to query sources");
        assert!(orphan.is_none(), "Sources should be deleted via cascade");
    }
}
