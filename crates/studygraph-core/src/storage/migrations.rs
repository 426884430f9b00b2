//! Database migrations
//!
//! This module manages SQLite schema migrations for studygraph.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Workspaces, resource projection and sources
const MIGRATION_V1: &str = r#"
    -- Subject-scoped workspaces
    CREATE TABLE IF NOT EXISTS workspaces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stage TEXT NOT NULL DEFAULT '',
        subject TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        description TEXT,
        created_by INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workspaces_subject ON workspaces(subject);

    -- Local projection of the external resource catalog
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        subject TEXT NOT NULL DEFAULT '',
        stage TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        ai_tags TEXT NOT NULL DEFAULT '[]',
        ai_summary TEXT,
        embedding TEXT,
        chapter_id INTEGER,
        chapter_code TEXT,
        chapter_title TEXT,
        section_id INTEGER,
        section_name TEXT,
        object_key TEXT,
        file_format TEXT,
        resource_kind TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'approved', 'rejected')),
        is_trashed INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_resources_subject ON resources(subject);
    CREATE INDEX IF NOT EXISTS idx_resources_status ON resources(status);
    CREATE INDEX IF NOT EXISTS idx_resources_updated_at ON resources(updated_at);

    -- One row per (workspace, logical content unit)
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        source_type TEXT NOT NULL DEFAULT 'resource' CHECK (source_type IN ('resource', 'upload')),
        resource_id INTEGER,
        title TEXT NOT NULL,
        object_key TEXT,
        file_format TEXT,
        summary_text TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        embedding TEXT,
        status TEXT NOT NULL DEFAULT 'ready' CHECK (status IN ('ready', 'indexed', 'published', 'error', 'inactive')),
        canonical_key TEXT NOT NULL DEFAULT '',
        variant_kind TEXT NOT NULL DEFAULT 'origin' CHECK (variant_kind IN ('origin', 'derived', 'upload', 'preview_pdf')),
        is_graph_visible INTEGER NOT NULL DEFAULT 1,
        display_priority INTEGER NOT NULL DEFAULT 100,
        created_by INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sources_workspace_id ON sources(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_sources_resource_id ON sources(resource_id);
    CREATE INDEX IF NOT EXISTS idx_sources_status ON sources(status);
    CREATE INDEX IF NOT EXISTS idx_sources_canonical_key ON sources(canonical_key);

    -- Ordered text segments of one source's assembled content
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(source_id, chunk_index)
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);

    -- Canonical concepts within a workspace
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        entity_type TEXT NOT NULL CHECK (entity_type IN ('chapter', 'knowledge_point', 'formula', 'experiment', 'problem_type', 'resource')),
        name TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        description TEXT,
        confidence REAL NOT NULL DEFAULT 0.0,
        source_id INTEGER REFERENCES sources(id) ON DELETE SET NULL,
        meta TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(workspace_id, entity_type, canonical_name)
    );

    CREATE INDEX IF NOT EXISTS idx_entities_workspace_id ON entities(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_entities_source_id ON entities(source_id);

    -- Directed typed edges between entities
    CREATE TABLE IF NOT EXISTS relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        source_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        target_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        relation_type TEXT NOT NULL CHECK (relation_type IN ('contains', 'related_to', 'appears_in', 'prerequisite_of', 'derived_from')),
        confidence REAL NOT NULL DEFAULT 0.0,
        source_id INTEGER REFERENCES sources(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        UNIQUE(workspace_id, source_entity_id, target_entity_id, relation_type, source_id)
    );

    CREATE INDEX IF NOT EXISTS idx_relations_workspace_id ON relations(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_relations_source_id ON relations(source_id);

    -- Text snippets justifying relations
    CREATE TABLE IF NOT EXISTS evidences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        chunk_id INTEGER REFERENCES chunks(id) ON DELETE SET NULL,
        content TEXT NOT NULL,
        score REAL NOT NULL DEFAULT 0.0,
        meta TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_evidences_source_id ON evidences(source_id);

    CREATE TABLE IF NOT EXISTS relation_evidences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        relation_id INTEGER NOT NULL REFERENCES relations(id) ON DELETE CASCADE,
        evidence_id INTEGER NOT NULL REFERENCES evidences(id) ON DELETE CASCADE,
        UNIQUE(relation_id, evidence_id)
    );

    CREATE INDEX IF NOT EXISTS idx_relation_evidences_relation_id ON relation_evidences(relation_id);
    CREATE INDEX IF NOT EXISTS idx_relation_evidences_evidence_id ON relation_evidences(evidence_id);
"#;

/// Migration 2: Persisted extraction jobs
///
/// Job rows are the single source of truth for background extraction status;
/// a crashed runner leaves a visible `processing` row instead of vanishing.
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS extraction_jobs (
        id TEXT PRIMARY KEY NOT NULL,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        mode TEXT NOT NULL DEFAULT 'quick' CHECK (mode IN ('quick', 'full')),
        status TEXT NOT NULL DEFAULT 'queued' CHECK (status IN ('queued', 'processing', 'done', 'partial_failed', 'failed', 'skipped')),
        stats TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_extraction_jobs_workspace_id ON extraction_jobs(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status ON extraction_jobs(status);
    CREATE INDEX IF NOT EXISTS idx_extraction_jobs_created_at ON extraction_jobs(created_at);
"#;

//// Migration 3: Immutable Q&A audit log
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS qa_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        citations TEXT NOT NULL DEFAULT '[]',
        highlight TEXT NOT NULL DEFAULT '{}',
        created_by INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_qa_logs_workspace_id ON qa_logs(workspace_id);
    CREATE INDEX IF NOT EXISTS idx_qa_logs_created_at ON qa_logs(created_at);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version
    let row: Option<(i32,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    // Apply migrations in order
    if current_version < 1 {
        tracing::info!("Applying migration v1: Workspaces, resources and sources");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Persisted extraction jobs");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    if current_version < 3 {
        tracing::info!("Applying migration v3: Q&A audit log");
        sqlx::raw_sql(MIGRATION_V3).execute(pool).await?;
        record_migration(pool, 3).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        // Should start with no migrations
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        // Run migrations
        run_migrations(&pool).await.unwrap();

        // Should be at current version
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        // Run migrations twice
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        // Should still be at current version
        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        // Check that tables exist by querying them
        let tables = vec![
            "workspaces",
            "resources",
            "sources",
            "chunks",
            "entities",
            "relations",
            "evidences",
            "relation_evidences",
            "extraction_jobs",
            "qa_logs",
        ];

        for table in tables {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_unique_constraints_enforced() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO workspaces (name, subject, created_at, updated_at) VALUES ('w', 'physics', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();

        let insert = "INSERT INTO entities (workspace_id, entity_type, name, canonical_name, confidence, created_at, updated_at) \
                      VALUES (1, 'formula', 'F = ma', 'f = ma', 0.68, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        let duplicate = sqlx::query(insert).execute(&pool).await;
        assert!(duplicate.is_err(), "duplicate canonical entity should be rejected");
    }
}
