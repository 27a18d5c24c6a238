//! The named service set (`capture`, `hourly`, `daily`) and its lifecycle.
//!
//! Each service implements [`Supervised`] so the supervisor can probe and
//! restart it. The capture worker is rebuilt from the wired stores on every
//! restart; the schedulers restart in place.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use tokio_util::sync::CancellationToken;
use trace_core::capture::pipeline::{CaptureStatsSnapshot, CaptureWorker};
use trace_core::services::ServiceState;
use trace_domain::{Result, TraceError};
use trace_infra::platform::SleepWakeWatcher;
use trace_infra::scheduling::{
    DailyScheduler, HourlyScheduler, Supervised, Supervisor,
};
use trace_infra::scheduling::daily::DailyJob;

use crate::context::AppContext;

/// Capture worker wrapper with restart support.
pub struct CaptureService {
    context: Arc<AppContext>,
    worker: Mutex<Option<CaptureWorker>>,
}

impl CaptureService {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context, worker: Mutex::new(None) }
    }

    pub fn start(&self) -> Result<()> {
        let mut worker = self.lock();
        if worker.as_ref().is_some_and(CaptureWorker::is_running) {
            return Ok(());
        }
        *worker = Some(self.context.spawn_capture()?);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(mut worker) = self.lock().take() {
            worker.stop();
        }
    }

    pub fn stats(&self) -> Option<CaptureStatsSnapshot> {
        self.lock().as_ref().map(|w| w.stats().snapshot())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CaptureWorker>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Supervised for CaptureService {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(CaptureWorker::is_running)
    }

    async fn restart(&self) -> Result<()> {
        self.stop();
        self.start()
    }
}

/// Scheduler wrapper with restart support.
pub struct SchedulerService<S> {
    name: &'static str,
    inner: tokio::sync::Mutex<S>,
}

#[async_trait]
pub trait Restartable: Send {
    fn running(&self) -> bool;
    async fn restart_inner(&mut self) -> Result<()>;
    async fn start_inner(&mut self) -> Result<()>;
    async fn stop_inner(&mut self) -> Result<()>;
}

macro_rules! impl_restartable {
    ($ty:ty) => {
        #[async_trait]
        impl Restartable for $ty {
            fn running(&self) -> bool {
                self.is_running()
            }

            async fn restart_inner(&mut self) -> Result<()> {
                if self.is_running() {
                    self.stop_inner().await?;
                }
                self.start_inner().await
            }

            async fn start_inner(&mut self) -> Result<()> {
                self.start().await.map_err(|e| TraceError::Fatal(e.to_string()))
            }

            async fn stop_inner(&mut self) -> Result<()> {
                self.stop().await.map_err(|e| TraceError::Fatal(e.to_string()))
            }
        }
    };
}

impl_restartable!(HourlyScheduler);
impl_restartable!(DailyScheduler);

impl<S: Restartable> SchedulerService<S> {
    pub fn new(name: &'static str, inner: S) -> Self {
        Self { name, inner: tokio::sync::Mutex::new(inner) }
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.lock().await.start_inner().await
    }

    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.running() {
            inner.stop_inner().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Restartable + Sync> Supervised for SchedulerService<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_running(&self) -> bool {
        self.inner.try_lock().map(|inner| inner.running()).unwrap_or(true)
    }

    async fn restart(&self) -> Result<()> {
        self.inner.lock().await.restart_inner().await
    }
}

/// The running service set.
pub struct ServiceSet {
    pub capture: Arc<CaptureService>,
    pub hourly: Arc<SchedulerService<HourlyScheduler>>,
    pub daily: Arc<SchedulerService<DailyScheduler>>,
    supervisor: Supervisor,
    wake_cancel: CancellationToken,
    context: Arc<AppContext>,
}

impl ServiceSet {
    /// Start capture, the summarize worker pool, both schedulers, the
    /// supervisor and the wake watcher. Runs a startup backfill pass.
    pub async fn start(context: Arc<AppContext>) -> Result<ServiceSet> {
        let registry = Arc::clone(&context.registry);

        // Capture.
        let capture = Arc::new(CaptureService::new(Arc::clone(&context)));
        registry.register("capture");
        registry.set_state("capture", ServiceState::Starting);
        capture.start()?;
        registry.set_state("capture", ServiceState::Running);

        // Summarize worker pool.
        context.queue.start_workers(
            Arc::clone(&context.summarizer),
            context.config.scheduler.summarize_parallelism,
        );

        // Schedulers.
        let hourly_inner = HourlyScheduler::new(Arc::clone(&context.queue))
            .await
            .map_err(|e| TraceError::Fatal(e.to_string()))?;
        let hourly = Arc::new(SchedulerService::new("hourly", hourly_inner));
        registry.register("hourly");
        registry.set_state("hourly", ServiceState::Starting);
        hourly.start().await?;
        registry.set_state("hourly", ServiceState::Running);

        let daily_job = Arc::new(DailyJob {
            reviser: Arc::clone(&context.reviser),
            screenshots: Arc::clone(&context.screenshots),
            blobs: Arc::clone(&context.blobs),
            retention_days: context.config.scheduler.retention_days,
        });
        let daily_inner = DailyScheduler::new(daily_job, context.config.scheduler.daily_hour)
            .await
            .map_err(|e| TraceError::Fatal(e.to_string()))?;
        let daily = Arc::new(SchedulerService::new("daily", daily_inner));
        registry.register("daily");
        registry.set_state("daily", ServiceState::Starting);
        daily.start().await?;
        registry.set_state("daily", ServiceState::Running);

        // Supervisor + wake watcher.
        let wake_cancel = CancellationToken::new();
        let wake_rx = SleepWakeWatcher::new(std::time::Duration::from_secs(5))
            .spawn(wake_cancel.clone());

        let mut supervisor = Supervisor::new(
            Arc::clone(&registry),
            vec![
                Arc::clone(&capture) as Arc<dyn Supervised>,
                Arc::clone(&hourly) as Arc<dyn Supervised>,
                Arc::clone(&daily) as Arc<dyn Supervised>,
            ],
            Arc::clone(&context.notifier),
            Arc::clone(&context.backfill),
            Arc::clone(&context.summarizer),
        );
        supervisor.start(wake_rx);

        // Startup backfill: catch hours missed while the process was down.
        if context.config.summarization_enabled() {
            let backfill = Arc::clone(&context.backfill);
            let summarizer = Arc::clone(&context.summarizer);
            let notifier = Arc::clone(&context.notifier);
            tokio::spawn(async move {
                let now = Local::now().naive_local();
                if let Err(err) = backfill.run(summarizer.as_ref(), notifier.as_ref(), now).await
                {
                    tracing::error!(error = %err, "startup backfill failed");
                }
            });
        }

        Ok(ServiceSet { capture, hourly, daily, supervisor, wake_cancel, context })
    }

    /// Stop everything in reverse order with bounded joins.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down services");
        self.wake_cancel.cancel();
        self.supervisor.stop().await;

        if let Err(err) = self.daily.stop().await {
            tracing::warn!(error = %err, "daily scheduler stop failed");
        }
        if let Err(err) = self.hourly.stop().await {
            tracing::warn!(error = %err, "hourly scheduler stop failed");
        }
        self.context.queue.stop_workers().await;
        self.capture.stop();

        self.context.registry.set_state("capture", ServiceState::Stopped);
        self.context.registry.set_state("hourly", ServiceState::Stopped);
        self.context.registry.set_state("daily", ServiceState::Stopped);
        tracing::info!("services stopped");
    }
}

