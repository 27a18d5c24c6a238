//! Service lifecycle bookkeeping.

pub mod registry;

pub use registry::{RestartDecision, ServiceRegistry, ServiceState, ServiceStatus};
