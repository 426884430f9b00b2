//! Entities, relations, evidence and chunks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical concept categories within a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Chapter,
    KnowledgePoint,
    Formula,
    Experiment,
    ProblemType,
    Resource,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chapter => "chapter",
            Self::KnowledgePoint => "knowledge_point",
            Self::Formula => "formula",
            Self::Experiment => "experiment",
            Self::ProblemType => "problem_type",
            Self::Resource => "resource",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "chapter" => Some(Self::Chapter),
            "knowledge_point" => Some(Self::KnowledgePoint),
            "formula" => Some(Self::Formula),
            "experiment" => Some(Self::Experiment),
            "problem_type" => Some(Self::ProblemType),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }

    pub fn all() -> &'static [EntityType] {
        &[
            Self::Chapter,
            Self::KnowledgePoint,
            Self::Formula,
            Self::Experiment,
            Self::ProblemType,
            Self::Resource,
        ]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed directed edge categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Contains,
    RelatedTo,
    AppearsIn,
    PrerequisiteOf,
    DerivedFrom,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::RelatedTo => "related_to",
            Self::AppearsIn => "appears_in",
            Self::PrerequisiteOf => "prerequisite_of",
            Self::DerivedFrom => "derived_from",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "contains" => Some(Self::Contains),
            "related_to" => Some(Self::RelatedTo),
            "appears_in" => Some(Self::AppearsIn),
            "prerequisite_of" => Some(Self::PrerequisiteOf),
            "derived_from" => Some(Self::DerivedFrom),
            _ => None,
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonicalize an entity name for the uniqueness constraint
pub fn canonicalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A canonical concept, unique per (workspace, type, canonical_name)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub workspace_id: i64,
    pub entity_type: EntityType,
    pub name: String,
    pub canonical_name: String,
    pub description: Option<String>,
    pub confidence: f64,
    pub source_id: Option<i64>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed typed edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub workspace_id: i64,
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub source_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A text snippet justifying a relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub workspace_id: i64,
    pub source_id: i64,
    pub chunk_id: Option<i64>,
    pub content: String,
    pub score: f64,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An ordered text segment of one source's assembled content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub source_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}
