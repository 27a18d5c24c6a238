//! OpenAI embeddings client implementing the [`Embedder`] port.

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;
use trace_core::summarize::ports::Embedder;
use trace_domain::{Result, TraceError};

use crate::http::HttpClient;

use super::types::{EmbeddingRequest, EmbeddingResponse};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Text embeddings over the OpenAI API.
pub struct OpenAIEmbedder {
    http: HttpClient,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAIEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, http: HttpClient) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            api_url: OPENAI_EMBEDDINGS_URL.to_string(),
        }
    }

    /// Override the endpoint, for tests against a local mock.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let payload = EmbeddingRequest { model: self.model.clone(), input: text.to_string() };

        let builder = self
            .http
            .request(Method::POST, &self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload);

        let response = self.http.send(builder).await?;
        let status = response.status();
        debug!(status = status.as_u16(), model = %self.model, "embedding response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => TraceError::Permission(format!("API key rejected ({status})")),
                429 => TraceError::Transient(format!("rate limited: {body}")),
                500..=599 => TraceError::Transient(format!("server error {status}: {body}")),
                other => TraceError::Validation(format!("API error {other}: {body}")),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| TraceError::SchemaInvalid(format!("embedding parse: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| TraceError::SchemaInvalid("embedding response was empty".into()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
