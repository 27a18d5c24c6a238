//! Daily scheduler: run the revision job (day rollup, aggregate
//! recomputation, retention trim) at a configured local hour.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trace_core::capture::ports::FrameBlobStore;
use trace_core::jobs::daily::DailyReviser;
use trace_core::storage::ScreenshotStore;
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};

const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// The work the daily tick performs, shared with the IPC surface so a
/// manual "revise yesterday" uses the same path.
pub struct DailyJob {
    pub reviser: Arc<DailyReviser>,
    pub screenshots: Arc<dyn ScreenshotStore>,
    pub blobs: Arc<dyn FrameBlobStore>,
    pub retention_days: i64,
}

impl DailyJob {
    /// Revise yesterday and trim retention-expired blobs.
    pub async fn run(&self) {
        let yesterday = (Local::now().naive_local() - ChronoDuration::days(1)).date();

        match self.reviser.revise_day(yesterday).await {
            Ok(revision) => {
                info!(
                    day = %yesterday,
                    hours = revision.hours_compacted,
                    aggregates = revision.aggregates_written,
                    "daily revision complete"
                );
            }
            Err(err) => error!(day = %yesterday, error = %err, "daily revision failed"),
        }

        let cutoff = Local::now().naive_local() - ChronoDuration::days(self.retention_days);
        match self.screenshots.delete_older_than(cutoff).await {
            Ok(paths) => {
                for path in &paths {
                    if let Err(err) = self.blobs.delete_blob(path) {
                        warn!(path, error = %err, "retention blob delete failed");
                    }
                }
                if !paths.is_empty() {
                    info!(count = paths.len(), "retention trim complete");
                }
            }
            Err(err) => error!(error = %err, "retention trim failed"),
        }
    }
}

/// Cron-driven daily revision scheduler.
pub struct DailyScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    job: Arc<DailyJob>,
    cron: String,
    task_handle: Option<JoinHandle<()>>,
    job_id: Option<Uuid>,
    cancellation: Option<CancellationToken>,
}

impl DailyScheduler {
    /// `daily_hour` is the local hour (0-23) the revision runs at.
    pub async fn new(job: Arc<DailyJob>, daily_hour: u32) -> SchedulerResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::CreationFailed(e.to_string()))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job,
            cron: format!("0 0 {} * * *", daily_hour.min(23)),
            task_handle: None,
            job_id: None,
            cancellation: None,
        })
    }

    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(cron = %self.cron, "starting daily scheduler");

        let cancel = CancellationToken::new();
        self.cancellation = Some(cancel.clone());

        let daily_job = Arc::clone(&self.job);
        let job = Job::new_async(self.cron.as_str(), move |job_id, _lock| {
            let daily_job = Arc::clone(&daily_job);
            Box::pin(async move {
                debug!(job_id = %job_id, "daily tick");
                daily_job.run().await;
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
            debug!("daily scheduler monitor cancelled");
        });
        self.task_handle = Some(handle);

        info!("daily scheduler started");
        Ok(())
    }

    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("stopping daily scheduler");

        if let Some(cancel) = &self.cancellation {
            cancel.cancel();
        }

        if let Some(job_id) = self.job_id.take() {
            let mut scheduler = self.scheduler.write().await;
            if let Err(e) = scheduler.remove(&job_id).await {
                warn!(job_id = %job_id, error = %e, "failed to remove daily job");
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
        info!("daily scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
            && self.cancellation.as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

impl Drop for DailyScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("daily scheduler dropped while running, cancelling");
            if let Some(cancel) = &self.cancellation {
                cancel.cancel();
            }
        }
    }
}
