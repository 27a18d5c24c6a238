//! Usage insights derived from aggregates and notes.

pub mod dashboard;
pub mod digest;
pub mod patterns;

pub use dashboard::{DashboardData, DashboardService};
pub use digest::{WeeklyDigest, WeeklyDigestService};
pub use patterns::{Pattern, PatternDetector};
