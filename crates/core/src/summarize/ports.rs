//! Port interfaces for summarization: language model, embeddings, vision
//! triage and note file persistence.

use async_trait::async_trait;
use trace_domain::Result;

use crate::triage::TriageResult;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// One part of a multimodal message.
#[derive(Clone)]
pub enum ContentPart {
    Text(String),
    /// JPEG bytes attached as a low-detail inline image.
    ImageJpeg(Vec<u8>),
}

impl std::fmt::Debug for ContentPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentPart::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            ContentPart::ImageJpeg(bytes) => {
                f.debug_tuple("ImageJpeg").field(&bytes.len()).finish()
            }
        }
    }
}

/// A chat message composed of one or more parts.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, parts: vec![ContentPart::Text(text.into())] }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, parts }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// A completion response with usage accounting.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Vision-capable chat model. Calls carry a deadline and are retried by the
/// caller on transient failures.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome>;

    fn model_name(&self) -> &str;
}

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// Optional vision triage of a single frame; mirrors the heuristic shape.
#[async_trait]
pub trait VisionTriager: Send + Sync {
    async fn triage(&self, jpeg: &[u8], app_id: Option<&str>) -> Result<TriageResult>;
}

/// Note file tree persistence under the data root.
#[async_trait]
pub trait NoteFiles: Send + Sync {
    /// Write the rendered Markdown, creating parent directories.
    async fn write_note(&self, relative_path: &str, content: &str) -> Result<()>;

    async fn read_note(&self, relative_path: &str) -> Result<String>;

    /// Load a stored screenshot as JPEG bytes, downscaled for prompt use.
    async fn load_frame_jpeg(&self, relative_path: &str) -> Result<Vec<u8>>;
}
