//! Tracked content units inside a workspace

use crate::canonical::{self, VariantKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ready,
    Indexed,
    Published,
    Error,
    Inactive,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Indexed => "indexed",
            Self::Published => "published",
            Self::Error => "error",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ready" => Some(Self::Ready),
            "indexed" => Some(Self::Indexed),
            "published" => Some(Self::Published),
            "error" => Some(Self::Error),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the source mirrors a catalog resource or an ad-hoc upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Resource,
    Upload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Upload => "upload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "resource" => Some(Self::Resource),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

/// One row per (workspace, logical content unit).
///
/// At most one active source per (workspace, resource) exists in steady
/// state; sync marks duplicates inactive instead of deleting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn is_active(&self) -> bool {
        self.status != SourceStatus::Inactive
    }

    /// Canonical key, recomputed from linkage when the stored one is blank
    pub fn resolved_canonical_key(&self) -> String {
        if self.resource_id.is_some() || self.object_key.is_some() {
            return canonical::canonical_key(
                self.resource_id,
                self.object_key.as_deref(),
                Some(self.variant_kind),
            );
        }
        if !self.canonical_key.is_empty() {
            return self.canonical_key.clone();
        }
        canonical::canonical_key(None, Some(&format!("source:{}", self.id)), None)
    }

    /// Preview PDFs never show up as their own graph node
    pub fn is_graph_visible_resolved(&self) -> bool {
        self.is_graph_visible && self.variant_kind != VariantKind::PreviewPdf
    }

    pub fn canonical_node_id(&self) -> String {
        canonical::canonical_node_id(&self.resolved_canonical_key())
    }
}
