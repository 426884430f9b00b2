//! Evidence-grounded question answering
//!
//! Ranks workspace sources against the question, drafts an answer via the
//! generator seam and always returns citations plus a graph highlight. A
//! missing or failing generator degrades to a deterministic template, never
//! an error.

use crate::ai::AiClient;
use crate::domain::Resource;
use crate::error::Result;
use crate::graph::placement;
use crate::infrastructure::{GraphStore, QaLogStore, ResourceStore, SourceStore};
use crate::search::{RankedSource, SemanticRanker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const CONTEXT_LIMIT: usize = 12;
const SNIPPET_MAX_CHARS: usize = 280;
const ANSWER_MAX_CHARS: usize = 2000;
const FALLBACK_HEADER: &str = "基于当前工作台证据，给出快速回答：";
const FALLBACK_LINES: usize = 4;

/// Answer drafting seam; [`AiClient`] is the production implementation
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, contexts: &[QaContext]) -> Result<String>;
    fn is_enabled(&self) -> bool;
}

#[async_trait]
impl AnswerGenerator for AiClient {
    async fn generate(&self, question: &str, contexts: &[QaContext]) -> Result<String> {
        let lines: Vec<String> = contexts
            .iter()
            .map(|c| format!("《{}》：{}", c.title, if c.summary.is_empty() { &c.snippet } else { &c.summary }))
            .collect();
        self.answer(question, &lines).await
    }

    fn is_enabled(&self) -> bool {
        AiClient::is_enabled(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaContext {
    pub source_id: i64,
    pub title: String,
    pub summary: String,
    pub snippet: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaCitation {
    pub source_id: i64,
    pub title: String,
    pub evidence: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaHighlight {
    pub nodes: Vec<String>,
    pub edges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaAnswer {
    pub answer: String,
    pub citations: Vec<QaCitation>,
    pub highlight: QaHighlight,
    pub contexts: Vec<QaContext>,
    pub log_id: i64,
}

pub struct QaResponder {
    pool: SqlitePool,
    sources: SourceStore,
    resources: ResourceStore,
    qa_logs: QaLogStore,
    ranker: SemanticRanker,
    generator: Arc<dyn AnswerGenerator>,
}

impl QaResponder {
    pub fn new(pool: SqlitePool, ai: Arc<AiClient>) -> Self {
        Self {
            sources: SourceStore::new(pool.clone()),
            resources: ResourceStore::new(pool.clone()),
            qa_logs: QaLogStore::new(pool.clone()),
            ranker: SemanticRanker::new(ai.clone()),
            generator: ai,
            pool,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn logs(&self) -> &QaLogStore {
        &self.qa_logs
    }

    pub async fn ask(&self, workspace_id: i64, question: &str, actor: i64) -> Result<QaAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(crate::Error::InvalidInput("Question must not be empty".into()));
        }

        let candidates = self.sources.search_visible(workspace_id, "", 200).await?;
        let ranked = self
            .ranker
            .rank(question, candidates, CONTEXT_LIMIT)
            .await?
            .items;

        let contexts: Vec<QaContext> = ranked.iter().map(context_for).collect();
        let answer = self.draft_answer(question, &contexts).await;

        let mut citations = Vec::new();
        for item in &ranked {
            let evidence = match GraphStore::top_evidence_for_source(&self.pool, item.source_id).await? {
                Some(evidence) => truncate_chars(&evidence.content, SNIPPET_MAX_CHARS),
                None => {
                    let context = &contexts[citations.len()];
                    if context.summary.is_empty() {
                        context.snippet.clone()
                    } else {
                        truncate_chars(&context.summary, SNIPPET_MAX_CHARS)
                    }
                }
            };
            citations.push(QaCitation {
                source_id: item.source_id,
                title: item.title.clone(),
                evidence,
                score: item.score,
            });
        }

        let highlight = self.build_highlight(&ranked).await?;

        let log_id = self
            .qa_logs
            .insert(
                workspace_id,
                question,
                &answer,
                &serde_json::to_value(&citations).unwrap_or_default(),
                &serde_json::to_value(&highlight).unwrap_or_default(),
                actor,
            )
            .await?;
        info!(workspace_id = workspace_id, log_id = log_id, "Question answered");

        Ok(QaAnswer {
            answer,
            citations,
            highlight,
            contexts,
            log_id,
        })
    }

    async fn draft_answer(&self, question: &str, contexts: &[QaContext]) -> String {
        if self.generator.is_enabled() && !contexts.is_empty() {
            match self.generator.generate(question, contexts).await {
                Ok(answer) if !answer.trim().is_empty() => {
                    return truncate_chars(answer.trim(), ANSWER_MAX_CHARS);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Answer generation failed, using fallback"),
            }
        }
        fallback_answer(contexts)
    }

    /// Graph node and edge ids the answer should light up
    async fn build_highlight(&self, ranked: &[RankedSource]) -> Result<QaHighlight> {
        let resource_ids: Vec<i64> = ranked
            .iter()
            .filter_map(|r| r.source.as_ref().and_then(|s| s.resource_id))
            .collect();
        let resources: HashMap<i64, Resource> = self
            .resources
            .get_many(&resource_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut highlight = QaHighlight::default();
        let mut seen_nodes = std::collections::HashSet::new();
        let mut seen_edges = std::collections::HashSet::new();
        let mut push_node = |highlight: &mut QaHighlight, id: String| {
            if seen_nodes.insert(id.clone()) {
                highlight.nodes.push(id);
            }
        };

        for item in ranked {
            let Some(source) = item.source.as_ref() else {
                continue;
            };
            let resource = source.resource_id.and_then(|id| resources.get(&id));
            let place = placement(source, resource);
            push_node(&mut highlight, place.chapter_node_id);
            push_node(&mut highlight, place.section_node_id);
            push_node(&mut highlight, source.canonical_node_id());

            for relation in GraphStore::relations_for_source(&self.pool, source.id).await? {
                push_node(&mut highlight, format!("entity:{}", relation.source_entity_id));
                push_node(&mut highlight, format!("entity:{}", relation.target_entity_id));
                let edge_id = format!(
                    "entity:{}->entity:{}:{}",
                    relation.source_entity_id,
                    relation.target_entity_id,
                    relation.relation_type.as_str()
                );
                if seen_edges.insert(edge_id.clone()) {
                    highlight.edges.push(edge_id);
                }
            }
        }
        Ok(highlight)
    }
}

fn context_for(item: &RankedSource) -> QaContext {
    let (summary, tags) = match item.source.as_ref() {
        Some(source) => (
            source.summary_text.clone().unwrap_or_default(),
            source.tags.clone(),
        ),
        None => (String::new(), Vec::new()),
    };
    let snippet_base = if summary.trim().is_empty() {
        item.title.as_str()
    } else {
        summary.as_str()
    };
    QaContext {
        source_id: item.source_id,
        title: item.title.clone(),
        summary: summary.trim().to_string(),
        snippet: truncate_chars(snippet_base.trim(), SNIPPET_MAX_CHARS),
        tags,
    }
}

/// Deterministic answer used whenever the generator is absent or fails
fn fallback_answer(contexts: &[QaContext]) -> String {
    let mut lines = vec![FALLBACK_HEADER.to_string()];
    for (i, context) in contexts.iter().take(FALLBACK_LINES).enumerate() {
        let body = if context.summary.is_empty() {
            &context.snippet
        } else {
            &context.summary
        };
        lines.push(format!("{}. {}: {}", i + 1, context.title, body));
    }
    truncate_chars(&lines.join("\n"), ANSWER_MAX_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
