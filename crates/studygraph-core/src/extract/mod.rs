//! Extraction engine
//!
//! Rebuilds one source's chunks, entities, relations and evidence inside the
//! caller's transaction. Rebuilds are destructive-then-rebuild so a source
//! never carries rows from two extraction runs.

pub mod chunker;
pub mod heuristics;

pub use chunker::split_chunks;
pub use heuristics::{
    EntityCandidate, EntityExtractor, ExtractionInput, HeuristicExtractor, RelationCandidate,
};

use crate::ai::AiClient;
use crate::config::ExtractionConfig;
use crate::domain::{JobMode, Resource, Source};
use crate::error::Result;
use crate::infrastructure::{GraphStore, NewEntity, SourceStore};
use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetches full document text for a source. The default provider returns
/// nothing; deployments wire in an object-store reader here.
#[async_trait]
pub trait DocumentTextProvider: Send + Sync {
    async fn fetch_text(&self, source: &Source) -> Result<Option<String>>;
}

pub struct NoopTextProvider;

#[async_trait]
impl DocumentTextProvider for NoopTextProvider {
    async fn fetch_text(&self, _source: &Source) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Row counts produced for one source
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOutcome {
    pub chunks: i64,
    pub entities: i64,
    pub relations: i64,
    pub evidences: i64,
}

/// Character budget for the source-level embedding text
const EMBED_TEXT_MAX_CHARS: usize = 5000;

pub struct ExtractionEngine {
    config: ExtractionConfig,
    extractor: Box<dyn EntityExtractor>,
    text_provider: Box<dyn DocumentTextProvider>,
    ai: Arc<AiClient>,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig, ai: Arc<AiClient>) -> Self {
        Self {
            config,
            extractor: Box::new(HeuristicExtractor),
            text_provider: Box::new(NoopTextProvider),
            ai,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn EntityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_text_provider(mut self, provider: Box<dyn DocumentTextProvider>) -> Self {
        self.text_provider = provider;
        self
    }

    /// Concatenated text a source contributes to chunking and heuristics
    pub async fn assemble_text(
        &self,
        source: &Source,
        resource: Option<&Resource>,
        mode: JobMode,
    ) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();
        if !source.title.trim().is_empty() {
            parts.push(source.title.trim().to_string());
        }
        if let Some(summary) = source.summary_text.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(summary.trim().to_string());
        }

        if mode == JobMode::Full {
            if let Some(text) = self.text_provider.fetch_text(source).await? {
                parts.push(truncate_bytes(&text, self.config.max_doc_bytes));
            }
        }

        if let Some(resource) = resource {
            if let Some(description) = resource
                .description
                .as_deref()
                .filter(|s| !s.trim().is_empty())
            {
                parts.push(description.trim().to_string());
            }
            if let Some(ai_summary) = resource
                .ai_summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
            {
                parts.push(ai_summary.trim().to_string());
            }
            let tags = resource.merged_tags();
            if !tags.is_empty() {
                parts.push(format!("标签：{}", tags.join("、")));
            }
        }

        let assembled = parts.join("\n");
        if assembled.trim().is_empty() {
            return Ok(source.title.clone());
        }
        Ok(assembled)
    }

    /// Drop and rebuild every extraction artifact of one source. Runs inside
    /// the transaction the caller hands in.
    pub async fn rebuild_source(
        &self,
        conn: &mut SqliteConnection,
        source: &Source,
        resource: Option<&Resource>,
        mode: JobMode,
    ) -> Result<ExtractOutcome> {
        GraphStore::cleanup_source_artifacts(conn, source.id).await?;

        let text = self.assemble_text(source, resource, mode).await?;

        // Backfill the source-level embedding when it is missing; summary
        // text is preferred over the assembled body. Soft-fails like chunk
        // embeddings do.
        if source.embedding.is_none() {
            let basis = source
                .summary_text
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&text);
            let snippet: String = basis.chars().take(EMBED_TEXT_MAX_CHARS).collect();
            if let Some(vector) = self.embed_soft(&snippet).await {
                SourceStore::write_embedding(conn, source.id, &vector).await?;
            }
        }

        let window = match mode {
            JobMode::Full => self.config.full_chunk_size,
            JobMode::Quick => self.config.quick_chunk_size,
        };

        let mut outcome = ExtractOutcome::default();
        let mut first_chunk_id = None;
        for (index, chunk) in split_chunks(&text, window, self.config.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            let embedding = self.embed_soft(&chunk).await;
            let chunk_id =
                GraphStore::insert_chunk(conn, source.id, index as i64, &chunk, embedding.as_deref())
                    .await?;
            first_chunk_id.get_or_insert(chunk_id);
            outcome.chunks += 1;
        }

        let input = ExtractionInput {
            source,
            resource,
            text: &text,
        };
        let candidates = self.extractor.extract(&input);
        let gate = self.config.relation_confidence_min;

        let mut hub_id = None;
        for candidate in &candidates {
            let upsert = GraphStore::upsert_entity(
                conn,
                source.workspace_id,
                &NewEntity {
                    entity_type: candidate.entity_type,
                    name: candidate.name.clone(),
                    description: candidate.description.clone(),
                    confidence: candidate.confidence,
                    source_id: Some(source.id),
                    meta: candidate.meta.clone(),
                },
            )
            .await?;
            if upsert.created {
                outcome.entities += 1;
            }

            let Some(link) = &candidate.link else {
                // The first unlinked candidate is the hub
                hub_id.get_or_insert(upsert.id);
                continue;
            };
            let Some(hub) = hub_id else {
                warn!(source_id = source.id, "Linked candidate before hub entity, skipping");
                continue;
            };

            let relation = GraphStore::insert_relation_gated(
                conn,
                source.workspace_id,
                upsert.id,
                hub,
                link.relation_type,
                link.confidence,
                Some(source.id),
                gate,
            )
            .await?;
            let Some(relation) = relation else {
                continue;
            };
            if relation.created {
                outcome.relations += 1;
            }

            let evidence_id = GraphStore::insert_evidence(
                conn,
                source.workspace_id,
                source.id,
                first_chunk_id,
                &link.evidence,
                link.evidence_score,
                &serde_json::json!({"relation_type": link.relation_type.as_str()}),
            )
            .await?;
            GraphStore::link_relation_evidence(conn, relation.id, evidence_id).await?;
            outcome.evidences += 1;
        }

        debug!(
            source_id = source.id,
            chunks = outcome.chunks,
            entities = outcome.entities,
            relations = outcome.relations,
            "Source rebuilt"
        );
        Ok(outcome)
    }

    async fn embed_soft(&self, text: &str) -> Option<Vec<f32>> {
        if !self.ai.is_enabled() {
            return None;
        }
        match self.ai.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "Chunk embedding failed, continuing without");
                None
            }
        }
    }
}

/// Truncate to a byte budget without splitting a char
fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
