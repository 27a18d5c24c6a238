//! Purpose-built collections.

pub mod bounded_queue;

pub use bounded_queue::{BoundedQueue, PushOutcome};
