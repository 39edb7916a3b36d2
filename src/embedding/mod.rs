//! Embedding client (C2): produces fixed-dimension vectors for text via an
//! external embedder.
//!
//! Grounded on `adapter/embedding.rs`'s `Embedder` trait — same shape (batch
//! in, vectors out, a typed error) — generalized to an async HTTP backend
//! that's tolerant of the embedder's two request shapes and three response
//! shapes (§4.2), plus a deterministic mock for tests.

use crate::config::Config;
use crate::error::EmbedError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Embeds batches of text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = self.embed_batch(&[text]).await?;
        v.pop().ok_or(EmbedError::Empty)
    }
}

/// Production embedder: calls an Ollama-style HTTP endpoint one text at a
/// time (the endpoint's contract is single-input), tolerant of both request
/// key conventions and all three documented response shapes.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(cfg: &Config) -> Self {
        Self::with_timeout(cfg, Duration::from_millis(cfg.embed_timeout_ms))
    }

    pub fn with_timeout(cfg: &Config, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build should not fail with static config");
        Self {
            client,
            base_url: cfg.ollama_base_url.clone(),
            model: cfg.embed_model.clone(),
        }
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));

        let mut body = self
            .post_json(&url, &serde_json::json!({ "model": self.model, "input": text }))
            .await?;

        if extract_embedding(&body).is_none() {
            body = self
                .post_json(&url, &serde_json::json!({ "model": self.model, "prompt": text }))
                .await?;
        }

        extract_embedding(&body)
            .filter(|v| !v.is_empty())
            .ok_or(EmbedError::Empty)
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value, EmbedError> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| EmbedError::Transport(e.to_string()))?;
        resp.json::<Value>()
            .await
            .map_err(|e| EmbedError::Decode(e.to_string()))
    }
}

/// Extract an embedding vector from any of the three documented response
/// shapes: top-level `embedding`, `data[0].embedding`, or `embeddings[0]`.
fn extract_embedding(body: &Value) -> Option<Vec<f32>> {
    if let Some(arr) = body.get("embedding").and_then(|v| v.as_array()) {
        return as_f32_vec(arr);
    }
    if let Some(arr) = body
        .get("data")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|first| first.get("embedding"))
        .and_then(|v| v.as_array())
    {
        return as_f32_vec(arr);
    }
    if let Some(arr) = body
        .get("embeddings")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.as_array())
    {
        return as_f32_vec(arr);
    }
    None
}

fn as_f32_vec(arr: &[Value]) -> Option<Vec<f32>> {
    let out: Vec<f32> = arr.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect();
    if out.len() == arr.len() {
        Some(out)
    } else {
        None
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed_single(t).await?);
        }
        Ok(out)
    }
}

/// Deterministic mock embedder for tests: returns a preconfigured vector per
/// text, or a zero vector of `dim` for unknown text.
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dim,
        }
    }

    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(*t).cloned().unwrap_or_else(|| vec![0.0; self.dim]))
            .collect())
    }
}

/// Cosine similarity between two vectors, used throughout C5–C8.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_embedding_top_level() {
        let body = serde_json::json!({"embedding": [0.1, 0.2, 0.3]});
        assert_eq!(extract_embedding(&body), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn extract_embedding_data_shape() {
        let body = serde_json::json!({"data": [{"embedding": [1.0, 2.0]}]});
        assert_eq!(extract_embedding(&body), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn extract_embedding_embeddings_shape() {
        let body = serde_json::json!({"embeddings": [[5.0, 6.0]]});
        assert_eq!(extract_embedding(&body), Some(vec![5.0, 6.0]));
    }

    #[test]
    fn extract_embedding_missing_is_none() {
        let body = serde_json::json!({"status": "ok"});
        assert_eq!(extract_embedding(&body), None);
    }

    #[tokio::test]
    async fn mock_embedder_returns_configured_vector() {
        let embedder = MockEmbedder::new(3).with("hello", vec![1.0, 0.0, 0.0]);
        let v = embedder.embed_one("hello").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn mock_embedder_unknown_text_is_zero_vector() {
        let embedder = MockEmbedder::new(3);
        let v = embedder.embed_one("unseen").await.unwrap();
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    }
}
