//! Local projection of the external resource catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Approval state of a catalog resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Approved,
    Rejected,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only projection of one catalog resource, as consumed by this core.
/// The embedding host application owns the catalog; we mirror the fields the
/// registry and extraction need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub stage: String,
    pub tags: Vec<String>,
    pub ai_tags: Vec<String>,
    pub ai_summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub chapter_id: Option<i64>,
    pub chapter_code: Option<String>,
    pub chapter_title: Option<String>,
    pub section_id: Option<i64>,
    pub section_name: Option<String>,
    pub object_key: Option<String>,
    pub file_format: Option<String>,
    pub resource_kind: String,
    pub status: ResourceStatus,
    pub is_trashed: bool,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Eligible for graph use: approved and not in the trash
    pub fn is_eligible(&self) -> bool {
        self.status == ResourceStatus::Approved && !self.is_trashed
    }

    /// AI tags first, then manual tags, order preserved, deduplicated
    pub fn merged_tags(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.ai_tags
            .iter()
            .chain(self.tags.iter())
            .filter(|tag| seen.insert(tag.as_str().to_string()))
            .cloned()
            .collect()
    }

    /// AI summary wins over the manual description
    pub fn summary(&self) -> Option<String> {
        self.ai_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.description.as_deref())
            .map(|s| s.to_string())
    }
}
