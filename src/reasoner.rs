//! Reasoner client — the LLM used for stage-2 reranking (C6) and scene
//! judging (C7).
//!
//! Grounded on `llm_orc.rs`'s `LlmOrcClient` trait: an async trait abstracting
//! transport, a mock for tests, and a production implementation — here an
//! HTTP client against the reasoner endpoint from §6 rather than a
//! subprocess, since the reasoner is reached over HTTP, not MCP-over-stdio.

use crate::error::ReasonerError;
use async_trait::async_trait;
use std::time::Duration;

/// Client for a text-completion reasoner endpoint.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Send `prompt` (optionally preceded by a system directive) and return
    /// the raw response text. Parsing/extraction of structured JSON from
    /// that text is the caller's responsibility (C6/C7 each parse
    /// differently-shaped output).
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, ReasonerError>;
}

/// Production client: `POST {base_url}/api/generate` with
/// `{model, prompt, stream: false, options: {temperature}}`, expecting
/// `{response: string}` back (§6).
pub struct HttpReasoner {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpReasoner {
    pub fn new(cfg: &crate::config::Config) -> Self {
        Self::with_timeout(cfg, Duration::from_millis(cfg.reasoner_timeout_ms))
    }

    pub fn with_timeout(cfg: &crate::config::Config, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build should not fail with static config");
        Self {
            client,
            base_url: cfg.ollama_base_url.clone(),
            model: cfg.reasoner_model.clone(),
        }
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: f32,
    ) -> Result<String, ReasonerError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let full_prompt = match system {
            Some(sys) => format!("{sys}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let body = serde_json::json!({
            "model": self.model,
            "prompt": full_prompt,
            "stream": false,
            "options": { "temperature": temperature },
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasonerError::Transport(e.to_string()))?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ReasonerError::Parse(e.to_string()))?;

        value
            .get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ReasonerError::Parse("missing `response` field".to_string()))
    }
}

/// Deterministic mock reasoner for tests: returns a preconfigured response
/// keyed by a substring of the prompt, falling back to a default.
pub struct MockReasoner {
    responses: Vec<(String, String)>,
    default: Option<String>,
}

impl MockReasoner {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default: None,
        }
    }

    /// Respond with `response` the first time a prompt contains `contains`.
    pub fn with_response(mut self, contains: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((contains.into(), response.into()));
        self
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default = Some(response.into());
        self
    }
}

impl Default for MockReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn complete(
        &self,
        prompt: &str,
        _system: Option<&str>,
        _temperature: f32,
    ) -> Result<String, ReasonerError> {
        for (needle, response) in &self.responses {
            if prompt.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        self.default
            .clone()
            .ok_or_else(|| ReasonerError::Transport("mock reasoner has no matching response".to_string()))
    }
}

/// A failing mock, for exercising the "reasoner returned garbage" fallback
/// paths without wiring up transport errors.
pub struct GarbageReasoner;

#[async_trait]
impl Reasoner for GarbageReasoner {
    async fn complete(&self, _prompt: &str, _system: Option<&str>, _temperature: f32) -> Result<String, ReasonerError> {
        Ok("I'm sorry, I can't help with that.".to_string())
    }
}
