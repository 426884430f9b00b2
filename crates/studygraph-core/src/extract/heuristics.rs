//! Deterministic entity and relation extraction
//!
//! Heuristics read the source row, its backing resource and the assembled
//! text; confidences are fixed per recipe step so repeated runs produce
//! identical rows. Model-based extractors plug in behind [`EntityExtractor`].

use crate::domain::{graph, EntityType, RelationType, Resource, Source};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const MAX_TAG_ENTITIES: usize = 12;
const MAX_FORMULA_ENTITIES: usize = 6;

static FORMULA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9_]{0,16}\s*=\s*[^\n]{1,40})")
        .unwrap_or_else(|e| panic!("Invalid formula regex: {}", e))
});

/// Everything an extractor can look at for one source
pub struct ExtractionInput<'a> {
    pub source: &'a Source,
    pub resource: Option<&'a Resource>,
    pub text: &'a str,
}

/// Proposed link from a candidate entity to the source's hub entity
#[derive(Debug, Clone)]
pub struct RelationCandidate {
    pub relation_type: RelationType,
    pub confidence: f64,
    pub evidence_score: f64,
    pub evidence: String,
}

#[derive(Debug, Clone)]
pub struct EntityCandidate {
    pub entity_type: EntityType,
    pub name: String,
    pub description: Option<String>,
    pub confidence: f64,
    pub meta: serde_json::Value,
    /// Relation from this entity to the hub; None for the hub itself
    pub link: Option<RelationCandidate>,
}

/// Extractor seam; the first `Resource`-typed candidate is the hub every
/// later candidate links to.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate>;
}

/// Recipe-driven extractor: hub, chapter, section, tags, formulas
#[derive(Default)]
pub struct HeuristicExtractor;

impl EntityExtractor for HeuristicExtractor {
    fn extract(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate> {
        let title = input.source.title.trim();
        let title = if title.is_empty() { "资源" } else { title };
        let mut candidates = vec![EntityCandidate {
            entity_type: EntityType::Resource,
            name: title.to_string(),
            description: input.source.summary_text.clone(),
            confidence: 0.88,
            meta: serde_json::json!({"source_id": input.source.id}),
            link: None,
        }];

        if let Some(resource) = input.resource {
            if let Some(chapter) = resource
                .chapter_title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
            {
                candidates.push(EntityCandidate {
                    entity_type: EntityType::Chapter,
                    name: chapter.trim().to_string(),
                    description: None,
                    confidence: 0.95,
                    meta: serde_json::json!({"chapter_id": resource.chapter_id}),
                    link: Some(RelationCandidate {
                        relation_type: RelationType::Contains,
                        confidence: 0.94,
                        evidence_score: 0.82,
                        evidence: format!("《{}》收录于章节「{}」", title, chapter.trim()),
                    }),
                });
            }

            if let Some(section) = resource
                .section_name
                .as_deref()
                .filter(|t| !t.trim().is_empty())
            {
                candidates.push(EntityCandidate {
                    entity_type: EntityType::KnowledgePoint,
                    name: section.trim().to_string(),
                    description: None,
                    confidence: 0.82,
                    meta: serde_json::json!({"section_id": resource.section_id}),
                    link: Some(RelationCandidate {
                        relation_type: RelationType::Contains,
                        confidence: 0.86,
                        evidence_score: 0.78,
                        evidence: format!("《{}》属于小节「{}」", title, section.trim()),
                    }),
                });
            }
        }

        let tags: Vec<String> = match input.resource {
            Some(resource) => resource.merged_tags(),
            None => input.source.tags.clone(),
        };
        for tag in tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .take(MAX_TAG_ENTITIES)
        {
            candidates.push(EntityCandidate {
                entity_type: EntityType::KnowledgePoint,
                name: tag.to_string(),
                description: None,
                confidence: 0.75,
                meta: serde_json::json!({"from": "tag"}),
                link: Some(RelationCandidate {
                    relation_type: RelationType::RelatedTo,
                    confidence: 0.76,
                    evidence_score: 0.74,
                    evidence: format!("《{}》带有标签「{}」", title, tag),
                }),
            });
        }

        let mut seen = HashSet::new();
        for capture in FORMULA_RE.find_iter(input.text) {
            let formula = capture.as_str().trim().to_string();
            if !seen.insert(graph::canonicalize_name(&formula)) {
                continue;
            }
            candidates.push(EntityCandidate {
                entity_type: EntityType::Formula,
                name: formula.clone(),
                description: None,
                confidence: 0.68,
                meta: serde_json::json!({"from": "formula"}),
                link: Some(RelationCandidate {
                    relation_type: RelationType::AppearsIn,
                    confidence: 0.65,
                    evidence_score: 0.66,
                    evidence: format!("公式「{}」出现在《{}》中", formula, title),
                }),
            });
            if seen.len() >= MAX_FORMULA_ENTITIES {
                break;
            }
        }

        candidates
    }
}
