//! Subject-scoped workspace container

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subject-scoped container for sources, entities and relations.
/// Resources are only ever bound where the subjects match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub stage: String,
    pub subject: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Whether a resource subject is in scope for this workspace.
    /// Resources without a subject are considered global.
    pub fn accepts_subject(&self, subject: &str) -> bool {
        let subject = subject.trim();
        subject.is_empty() || subject == self.subject
    }
}
