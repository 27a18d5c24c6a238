//! Resilience primitives: retry with exponential backoff.

pub mod retry;

pub use retry::{execute_with_retry, RetryConfig, RetryError};
