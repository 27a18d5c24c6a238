//! Hourly summarization: prompt assembly, LLM invocation, schema
//! validation, Markdown rendering, entity/edge/embedding write-through.

pub mod embedding_text;
pub mod entities;
pub mod ports;
pub mod prompts;
pub mod render;
pub mod schema;
pub mod summarizer;

pub use entities::EntityExtractor;
pub use ports::{
    ChatMessage, ChatOutcome, ChatRequest, ContentPart, Embedder, LanguageModel, NoteFiles, Role,
    VisionTriager,
};
pub use render::MarkdownRenderer;
pub use schema::{empty_summary, fix_common_issues, validate_summary, validate_with_retry};
pub use summarizer::{HourlySummarizer, SummarizeOutcome};
