//! SQLite-backed stores
//!
//! Each store wraps a table family: workspaces, the resource projection,
//! sources, graph rows (chunks/entities/relations/evidence), extraction jobs
//! and the Q&A log. Read paths take the pool; extraction write paths take a
//! `&mut SqliteConnection` so a whole source rebuild shares one transaction.

pub mod graph;
pub mod jobs;
pub mod qa_logs;
pub mod resources;
pub mod sources;
pub mod workspaces;

pub use graph::{EntityUpsert, GraphStore, NewEntity, RelationUpsert};
pub use jobs::JobStore;
pub use qa_logs::{QaLog, QaLogStore};
pub use resources::ResourceStore;
pub use sources::{NewSource, SourceStore};
pub use workspaces::WorkspaceStore;

/// Render a `?`-placeholder list for a dynamic `IN (...)` clause
pub(crate) fn placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serialize a JSON-typed column value
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> crate::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| crate::Error::Other(format!("Failed to serialize column: {}", e)))
}
