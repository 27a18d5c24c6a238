//! Hourly scheduler: enqueue a summarization job for the previous hour at
//! every top of hour.
//!
//! Wraps `tokio-cron-scheduler` with explicit lifecycle management: start
//! and stop are bounded by 5-second timeouts, the registered job id is
//! tracked for cleanup, and a cancellation token guards the monitor task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trace_domain::utils::time::floor_to_hour;
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::queue::SummarizeQueue;

/// Top-of-hour cron expression (sec min hour dom month dow).
const HOURLY_CRON: &str = "0 0 * * * *";
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cron-driven hourly job submitter.
pub struct HourlyScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    queue: Arc<SummarizeQueue>,
    task_handle: Option<JoinHandle<()>>,
    job_id: Option<Uuid>,
    cancellation: Option<CancellationToken>,
}

impl HourlyScheduler {
    pub async fn new(queue: Arc<SummarizeQueue>) -> SchedulerResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::CreationFailed(e.to_string()))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            queue,
            task_handle: None,
            job_id: None,
            cancellation: None,
        })
    }

    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(cron = HOURLY_CRON, "starting hourly scheduler");

        let cancel = CancellationToken::new();
        self.cancellation = Some(cancel.clone());

        let queue = Arc::clone(&self.queue);
        let job = Job::new_async(HOURLY_CRON, move |job_id, _lock| {
            let queue = Arc::clone(&queue);
            Box::pin(async move {
                let previous_hour =
                    floor_to_hour(Local::now().naive_local() - ChronoDuration::hours(1));
                debug!(job_id = %job_id, hour = %previous_hour, "hourly tick");
                queue.enqueue(previous_hour, false);
            })
        })
        .map_err(|e| SchedulerError::JobRegistrationFailed(e.to_string()))?;

        let job_id = {
            let mut scheduler = self.scheduler.write().await;
            scheduler
                .add(job)
                .await
                .map_err(|e| SchedulerError::JobRegistrationFailed(e.to_string()))?
        };
        self.job_id = Some(job_id);

        let scheduler = Arc::clone(&self.scheduler);
        tokio::time::timeout(LIFECYCLE_TIMEOUT, async move {
            let mut scheduler = scheduler.write().await;
            scheduler.start().await
        })
        .await
        .map_err(|_| SchedulerError::Timeout { seconds: LIFECYCLE_TIMEOUT.as_secs() })?
        .map_err(|e| SchedulerError::StartFailed(e.to_string()))?;

        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("hourly scheduler monitor cancelled");
        });
        self.task_handle = Some(handle);

        info!("hourly scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("stopping hourly scheduler");

        if let Some(cancel) = &self.cancellation {
            cancel.cancel();
        }

        if let Some(job_id) = self.job_id.take() {
            let mut scheduler = self.scheduler.write().await;
            if let Err(e) = scheduler.remove(&job_id).await {
                warn!(job_id = %job_id, error = %e, "failed to remove hourly job");
            }
        }

        let scheduler = Arc::clone(&self.scheduler);
        tokio::time::timeout(LIFECYCLE_TIMEOUT, async move {
            let mut scheduler = scheduler.write().await;
            scheduler.shutdown().await
        })
        .await
        .map_err(|_| SchedulerError::Timeout { seconds: LIFECYCLE_TIMEOUT.as_secs() })?
        .map_err(|e| SchedulerError::StopFailed(e.to_string()))?;

        if let Some(handle) = self.task_handle.take() {
            tokio::time::timeout(LIFECYCLE_TIMEOUT, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: LIFECYCLE_TIMEOUT.as_secs() })?
                .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        self.cancellation = None;
        info!("hourly scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
            && self.cancellation.as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

impl Drop for HourlyScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("hourly scheduler dropped while running, cancelling");
            if let Some(cancel) = &self.cancellation {
                cancel.cancel();
            }
        }
    }
}
