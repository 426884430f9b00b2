//! OpenAI-compatible client for embeddings and answer drafting
//!
//! Every caller treats this client as optional: a missing key or a failed
//! request degrades to lexical-only ranking or the deterministic answer
//! template, never to an error on the request path.

use crate::config::AiConfig;
use crate::error::Result;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const CHAT_TEMPERATURE: f64 = 0.2;
const ANSWER_MAX_CHARS: usize = 2000;

#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embedding_model: String,
    chat_model: String,
}

#[derive(Default)]
pub struct AiClientBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    embedding_model: Option<String>,
    chat_model: Option<String>,
    timeout: Option<Duration>,
}

impl AiClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<AiClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(60)))
            .build()?;
        Ok(AiClient {
            http,
            base_url: self
                .base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: self.api_key.filter(|k| !k.trim().is_empty()),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            chat_model: self.chat_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

impl AiClient {
    pub fn builder() -> AiClientBuilder {
        AiClientBuilder::default()
    }

    /// Build from config; the key is resolved from the environment only
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| crate::Error::ConfigError(e.to_string()))?;
        Self::builder()
            .base_url(&config.base_url)
            .api_key(api_key)
            .embedding_model(&config.embedding_model)
            .chat_model(&config.chat_model)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
    }

    /// True when an API key is configured
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| crate::Error::AiError("No API key configured".into()))?;

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(key)
            .json(&json!({
                "model": self.embedding_model,
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Embedding request failed");
            return Err(crate::Error::AiError(format!(
                "Embedding request failed with status {}",
                status
            )));
        }

        let body: EmbeddingResponse = response.json().await?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| crate::Error::AiError("Empty embedding response".into()))?;
        debug!(dims = vector.len(), "Embedding fetched");
        Ok(vector)
    }

    /// Draft an answer from ranked context lines; soft-failed by callers
    pub async fn answer(&self, question: &str, contexts: &[String]) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| crate::Error::AiError("No API key configured".into()))?;

        let system = "你是一个学科知识助手。仅依据提供的证据回答问题，\
                      引用证据中的资料名称，不要编造内容。";
        let user = format!("问题：{}\n\n证据：\n{}", question, contexts.join("\n"));

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&json!({
                "model": self.chat_model,
                "temperature": CHAT_TEMPERATURE,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Chat request failed");
            return Err(crate::Error::AiError(format!(
                "Chat request failed with status {}",
                status
            )));
        }

        let body: ChatResponse = response.json().await?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if answer.trim().is_empty() {
            return Err(crate::Error::AiError("Empty chat response".into()));
        }
        Ok(answer.chars().take(ANSWER_MAX_CHARS).collect())
    }
}

/// Cosine similarity over the overlapping prefix; 0 for empty or zero-norm
/// inputs so a bad vector never poisons a ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..len {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        // Mismatched lengths compare the overlapping prefix
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 5.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_without_key() {
        let client = AiClient::builder().api_key(None).build().unwrap();
        assert!(!client.is_enabled());
        let client = AiClient::builder().api_key(Some("  ".into())).build().unwrap();
        assert!(!client.is_enabled());
        let client = AiClient::builder().api_key(Some("sk-test".into())).build().unwrap();
        assert!(client.is_enabled());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = AiClient::builder()
            .base_url("https://example.com/v1/")
            .build()
            .unwrap();
        assert_eq!(client.base_url, "https://example.com/v1");
    }
}
