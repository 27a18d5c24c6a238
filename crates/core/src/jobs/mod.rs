//! Background jobs: backfill detection and the daily revision.

pub mod backfill;
pub mod daily;

pub use backfill::{BackfillDetector, BackfillReport};
pub use daily::{DailyReviser, DailyRevision};
