//! Semantic source ranking
//!
//! Blends vector similarity with lexical hits over summary, title and tags,
//! then normalizes with a stabilized softmax. Works with or without an
//! embedding backend; vector scores degrade to 0 when either side is
//! missing.

use crate::ai::{self, AiClient};
use crate::domain::Source;
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

pub const SCORING_PROFILE: &str = "balanced_v1";

const WEIGHT_VECTOR: f64 = 0.55;
const WEIGHT_SUMMARY: f64 = 0.20;
const WEIGHT_CONTENT: f64 = 0.15;
const WEIGHT_TAGS: f64 = 0.10;
const SOFTMAX_CLAMP: f64 = 60.0;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-z0-9]+|[一-鿿]").unwrap_or_else(|e| panic!("Invalid token regex: {}", e))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSource {
    pub source_id: i64,
    pub title: String,
    /// Softmax probability, rounded to 6 decimals
    pub score: f64,
    pub raw_score: f64,
    pub vector_score: f64,
    pub lexical_score: f64,
    #[serde(skip)]
    pub source: Option<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<RankedSource>,
    pub threshold: f64,
    pub profile: String,
}

impl SearchResponse {
    /// Drop every item scoring below the adaptive threshold. Callers that
    /// want the full ranked list simply skip this.
    pub fn retain_accepted(&mut self) {
        let threshold = self.threshold;
        self.items.retain(|item| item.score >= threshold);
    }
}

pub struct SemanticRanker {
    ai: Arc<AiClient>,
}

impl SemanticRanker {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }

    /// Rank sources against a query, best first, truncated to
    /// `max(1, min(20, top_k))`.
    pub async fn rank(
        &self,
        query: &str,
        sources: Vec<Source>,
        top_k: usize,
    ) -> Result<SearchResponse> {
        let query_embedding = self.embed_soft(query).await;

        let mut scored: Vec<(f64, f64, f64, Source)> = sources
            .into_iter()
            .map(|source| {
                let vector = vector_score(query_embedding.as_deref(), source.embedding.as_deref());
                let summary = lexical_score(query, source.summary_text.as_deref().unwrap_or(""));
                let content = lexical_score(query, &source.title);
                let tags = lexical_score(query, &source.tags.join(" "));
                let raw = WEIGHT_VECTOR * vector
                    + WEIGHT_SUMMARY * summary
                    + WEIGHT_CONTENT * content
                    + WEIGHT_TAGS * tags;
                let lexical = summary.max(content).max(tags);
                (raw, vector, lexical, source)
            })
            .collect();

        let probabilities = softmax(&scored.iter().map(|(raw, ..)| *raw).collect::<Vec<_>>());
        let mut items: Vec<(f64, RankedSource)> = scored
            .drain(..)
            .zip(probabilities)
            .map(|((raw, vector, lexical, source), probability)| {
                (
                    probability,
                    RankedSource {
                        source_id: source.id,
                        title: source.title.clone(),
                        score: round6(probability),
                        raw_score: round6(raw),
                        vector_score: round6(vector),
                        lexical_score: round6(lexical),
                        source: Some(source),
                    },
                )
            })
            .collect();

        items.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let top_k = top_k.min(20).max(1);
        items.truncate(top_k);

        let returned: Vec<f64> = items.iter().map(|(p, _)| *p).collect();
        let threshold = adaptive_threshold(&returned);

        debug!(query = %query, returned = items.len(), threshold = threshold, "Sources ranked");
        Ok(SearchResponse {
            items: items.into_iter().map(|(_, item)| item).collect(),
            threshold: round6(threshold),
            profile: SCORING_PROFILE.to_string(),
        })
    }

    async fn embed_soft(&self, query: &str) -> Option<Vec<f32>> {
        if !self.ai.is_enabled() || query.trim().is_empty() {
            return None;
        }
        match self.ai.embed(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, lexical-only ranking");
                None
            }
        }
    }
}

/// Lowercased alphanumeric runs plus single CJK chars
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Exact substring hit scores 1.0; otherwise the fraction of query tokens
/// present in the text.
pub fn lexical_score(query: &str, text: &str) -> f64 {
    let query_norm = query.trim().to_lowercase();
    if query_norm.is_empty() || text.is_empty() {
        return 0.0;
    }
    let text_norm = text.to_lowercase();
    if text_norm.contains(&query_norm) {
        return 1.0;
    }
    // Repeated query tokens count once
    let mut seen = std::collections::HashSet::new();
    let tokens: Vec<String> = tokenize(&query_norm)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens.iter().filter(|t| text_norm.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// Cosine mapped onto [0, 1]; 0 when either vector is missing
fn vector_score(query: Option<&[f32]>, doc: Option<&[f32]>) -> f64 {
    match (query, doc) {
        (Some(q), Some(d)) => (((ai::cosine_similarity(q, d)) + 1.0) / 2.0).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Stabilized softmax: args clamped to [-60, 60], max subtracted
pub fn softmax(raws: &[f64]) -> Vec<f64> {
    if raws.is_empty() {
        return Vec::new();
    }
    let clamped: Vec<f64> = raws
        .iter()
        .map(|r| r.clamp(-SOFTMAX_CLAMP, SOFTMAX_CLAMP))
        .collect();
    let max = clamped.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = clamped.iter().map(|r| (r - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Confidence floor derived from the entropy of the returned distribution.
/// A peaked distribution earns a higher floor than a flat one. Truncated
/// distributions are renormalized before the entropy sum so the floor does
/// not depend on how much probability mass the cut dropped.
pub fn adaptive_threshold(probabilities: &[f64]) -> f64 {
    let n = probabilities.len();
    if n == 0 {
        return 0.02;
    }
    if n <= 1 {
        return 0.08;
    }
    let mass: f64 = probabilities.iter().filter(|p| **p > 0.0).sum();
    if mass <= 0.0 {
        return 0.02;
    }
    let entropy: f64 = probabilities
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| {
            let q = p / mass;
            -q * q.ln()
        })
        .sum();
    let normalized = entropy / (n as f64).ln();
    (0.02 + (1.0 - normalized) * 0.06).clamp(0.02, 0.08)
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
