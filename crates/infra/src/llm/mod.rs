//! OpenAI-backed language model and embedding providers.

pub mod embeddings;
pub mod openai;
pub mod types;

pub use embeddings::OpenAIEmbedder;
pub use openai::{OpenAIChatModel, OpenAIVisionTriager};
