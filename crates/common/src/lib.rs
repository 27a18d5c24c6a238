//! # Trace Common
//!
//! Cross-cutting utilities shared by every Trace crate.
//!
//! This crate contains:
//! - Retry/backoff primitives used for LLM, HTTP and database calls
//! - Bounded collections used for job queue backpressure
//!
//! ## Architecture
//! - No dependencies on other Trace crates
//! - Pure utility code, no domain knowledge

pub mod collections;
pub mod resilience;

pub use collections::bounded_queue::{BoundedQueue, PushOutcome};
pub use resilience::retry::{execute_with_retry, RetryConfig, RetryError};
