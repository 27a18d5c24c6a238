//! Schedulers, the summarization worker and the supervisor.

pub mod daily;
pub mod error;
pub mod hourly;
pub mod queue;
pub mod supervisor;

pub use daily::DailyScheduler;
pub use error::{SchedulerError, SchedulerResult};
pub use hourly::HourlyScheduler;
pub use queue::{SummarizeJob, SummarizeQueue};
pub use supervisor::{Supervised, Supervisor};
