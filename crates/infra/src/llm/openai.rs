//! OpenAI chat completions client implementing the [`LanguageModel`] port,
//! plus the optional vision triager built on the same endpoint.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use tracing::{debug, info};
use trace_core::summarize::ports::{
    ChatOutcome, ChatRequest, ContentPart, LanguageModel, Role, VisionTriager,
};
use trace_core::triage::{FrameCategory, TriageResult};
use trace_domain::{Result, TraceError};

use crate::http::HttpClient;

use super::types::{
    ApiContent, ApiMessage, ApiPart, ChatCompletionRequest, ChatCompletionResponse, ImageUrl,
    ResponseFormat,
};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Vision-capable chat model over the OpenAI API.
pub struct OpenAIChatModel {
    http: HttpClient,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAIChatModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, http: HttpClient) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            api_url: OPENAI_CHAT_URL.to_string(),
        }
    }

    /// Override the endpoint, for tests against a local mock.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

fn to_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
    request
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
            };

            let only_text = message
                .parts
                .iter()
                .all(|part| matches!(part, ContentPart::Text(_)));

            let content = if only_text && message.parts.len() == 1 {
                match &message.parts[0] {
                    ContentPart::Text(text) => ApiContent::Text(text.clone()),
                    ContentPart::ImageJpeg(_) => unreachable!("filtered above"),
                }
            } else {
                ApiContent::Parts(
                    message
                        .parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => ApiPart::Text { text: text.clone() },
                            ContentPart::ImageJpeg(bytes) => {
                                let encoded =
                                    base64::engine::general_purpose::STANDARD.encode(bytes);
                                ApiPart::ImageUrl {
                                    image_url: ImageUrl {
                                        url: format!("data:image/jpeg;base64,{encoded}"),
                                        detail: "low",
                                    },
                                }
                            }
                        })
                        .collect(),
                )
            };

            ApiMessage { role, content }
        })
        .collect()
}

async fn classify_error(status: u16, response: reqwest::Response) -> TraceError {
    let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
    match status {
        401 | 403 => TraceError::Permission(format!("API key rejected ({status})")),
        429 => TraceError::Transient(format!("rate limited: {body}")),
        500..=599 => TraceError::Transient(format!("server error {status}: {body}")),
        _ => TraceError::Validation(format!("API error {status}: {body}")),
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: to_api_messages(&request),
            max_completion_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request
                .json_mode
                .then_some(ResponseFormat { format_type: "json_object" }),
        };

        let builder = self
            .http
            .request(Method::POST, &self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload);

        let response = self.http.send(builder).await?;
        let status = response.status();
        debug!(status = status.as_u16(), model = %self.model, "chat completion response");

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), response).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TraceError::SchemaInvalid(format!("response parse: {e}")))?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| TraceError::SchemaInvalid("response contained no choices".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        info!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "chat completion finished"
        );

        Ok(ChatOutcome {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

const TRIAGE_SYSTEM_PROMPT: &str = "You are a screenshot classifier for a personal activity tracker.\n\
\n\
Analyze the screenshot and provide a JSON response with:\n\
1. category: one of [transition, document, media, browsing, idle, communication, creative, gaming, other]\n\
2. importance: 0.0 to 1.0 indicating how representative this frame is\n\
3. description: brief (1-2 sentences) description of what's visible\n\
4. has_text: boolean, is there significant readable text on screen?\n\
5. has_document: boolean, is a document, code file, or PDF being viewed?\n\
6. has_media: boolean, is video or streaming content visible?\n\
\n\
Respond with valid JSON only.";

/// Vision triage over the same chat endpoint with a smaller model.
pub struct OpenAIVisionTriager {
    model: OpenAIChatModel,
}

impl OpenAIVisionTriager {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, http: HttpClient) -> Self {
        Self { model: OpenAIChatModel::new(api_key, model, http) }
    }

    #[cfg(test)]
    fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.model = self.model.with_api_url(url);
        self
    }
}

#[async_trait]
impl VisionTriager for OpenAIVisionTriager {
    async fn triage(&self, jpeg: &[u8], app_id: Option<&str>) -> Result<TriageResult> {
        let context = app_id
            .map(|id| format!("Foreground app: {id}. "))
            .unwrap_or_default();

        let request = ChatRequest {
            messages: vec![
                trace_core::summarize::ports::ChatMessage::system(TRIAGE_SYSTEM_PROMPT),
                trace_core::summarize::ports::ChatMessage::user(vec![
                    ContentPart::Text(format!(
                        "{context}Classify this screenshot and score its importance."
                    )),
                    ContentPart::ImageJpeg(jpeg.to_vec()),
                ]),
            ],
            json_mode: true,
            max_tokens: 300,
            temperature: None,
        };

        let outcome = self.model.complete(request).await?;
        let value: serde_json::Value = serde_json::from_str(&outcome.content)
            .map_err(|e| TraceError::SchemaInvalid(format!("triage parse: {e}")))?;

        Ok(TriageResult {
            category: value
                .get("category")
                .and_then(serde_json::Value::as_str)
                .map(FrameCategory::parse_lenient)
                .unwrap_or(FrameCategory::Other),
            importance: value
                .get("importance")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            has_text: value.get("has_text").and_then(serde_json::Value::as_bool).unwrap_or(false),
            has_document: value
                .get("has_document")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            has_media: value
                .get("has_media")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            description: value
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }
}
