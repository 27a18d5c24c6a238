//! The supervisor: periodic health checks, bounded restarts, and
//! wake-triggered backfill.
//!
//! Every sixty seconds each supervised service's running flag is probed.
//! A dead service is restarted up to the cap recorded in the registry;
//! beyond that it is marked failed and a critical notification is raised.
//! Wake events with a sleep longer than five minutes trigger a backfill
//! pass for the missed hours.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trace_core::jobs::backfill::BackfillDetector;
use trace_core::notify::{NotificationLevel, Notifier};
use trace_core::services::{RestartDecision, ServiceRegistry, ServiceState};
use trace_core::summarize::summarizer::HourlySummarizer;
use trace_domain::constants::{HEALTH_CHECK_INTERVAL_SECS, WAKE_BACKFILL_MIN_SLEEP_SECS};
use trace_domain::Result;

use crate::platform::WakeEvent;

/// A service the supervisor can probe and restart.
#[async_trait]
pub trait Supervised: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_running(&self) -> bool;

    async fn restart(&self) -> Result<()>;
}

/// Supervisor over the named services plus the wake handler.
pub struct Supervisor {
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<dyn Supervised>>,
    notifier: Arc<dyn Notifier>,
    backfill: Arc<BackfillDetector>,
    summarizer: Arc<HourlySummarizer>,
    check_interval: Duration,
    handle: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        services: Vec<Arc<dyn Supervised>>,
        notifier: Arc<dyn Notifier>,
        backfill: Arc<BackfillDetector>,
        summarizer: Arc<HourlySummarizer>,
    ) -> Self {
        for service in &services {
            registry.register(service.name());
        }
        Self {
            registry,
            services,
            notifier,
            backfill,
            summarizer,
            check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            handle: None,
            cancel: None,
        }
    }

    /// Start the health loop. Wake events arrive on `wake_rx`.
    pub fn start(&mut self, mut wake_rx: tokio::sync::mpsc::Receiver<WakeEvent>) {
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let registry = Arc::clone(&self.registry);
        let services = self.services.clone();
        let notifier = Arc::clone(&self.notifier);
        let backfill = Arc::clone(&self.backfill);
        let summarizer = Arc::clone(&self.summarizer);
        let interval = self.check_interval;

        self.handle = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "supervisor started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        health_check(&registry, &services, &notifier).await;
                    }
                    wake = wake_rx.recv() => {
                        match wake {
                            Some(event) => {
                                handle_wake(&event, &backfill, &summarizer, &notifier).await;
                            }
                            None => {
                                debug!("wake channel closed");
                                // Health checks continue without wake events.
                                tokio::select! {
                                    () = cancel.cancelled() => break,
                                    () = tokio::time::sleep(interval) => {
                                        health_check(&registry, &services, &notifier).await;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            info!("supervisor stopped");
        }));
    }

    pub fn is_running(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("supervisor did not stop within timeout");
            }
        }
    }
}

async fn health_check(
    registry: &Arc<ServiceRegistry>,
    services: &[Arc<dyn Supervised>],
    notifier: &Arc<dyn Notifier>,
) {
    for service in services {
        let name = service.name();

        // Skip services the operator stopped on purpose or that already
        // exhausted their restarts.
        if !registry.supervised_names().iter().any(|n| n == name) {
            continue;
        }

        if service.is_running() {
            registry.reset_restarts(name);
            continue;
        }

        warn!(service = name, "service is not running");
        registry.record_error(name, "health check failed");

        match registry.restart_decision(name) {
            RestartDecision::Retry { attempt } => {
                info!(service = name, attempt, "restarting service");
                match service.restart().await {
                    Ok(()) => {
                        registry.set_state(name, ServiceState::Running);
                        notifier.notify(
                            NotificationLevel::Warning,
                            &format!("{name} restarted"),
                            &format!("Attempt {attempt}"),
                        );
                    }
                    Err(err) => {
                        error!(service = name, error = %err, "restart failed");
                        registry.record_error(name, &err.to_string());
                    }
                }
            }
            RestartDecision::GiveUp => {
                error!(service = name, "max restart attempts exceeded");
                notifier.notify(
                    NotificationLevel::Critical,
                    &format!("{name} service failed"),
                    "Max restart attempts exceeded",
                );
            }
        }
    }
}

/// Whether a sleep was long enough to have missed a summarization window.
/// Short naps stay under the five-minute threshold.
fn wake_triggers_backfill(sleep_duration: Duration) -> bool {
    sleep_duration.as_secs_f64() > WAKE_BACKFILL_MIN_SLEEP_SECS
}

async fn handle_wake(
    event: &WakeEvent,
    backfill: &Arc<BackfillDetector>,
    summarizer: &Arc<HourlySummarizer>,
    notifier: &Arc<dyn Notifier>,
) {
    let slept = event.sleep_duration.as_secs_f64();
    if !wake_triggers_backfill(event.sleep_duration) {
        debug!(sleep_secs = slept, "short sleep, skipping backfill");
        return;
    }

    info!(sleep_secs = slept, "wake after long sleep, running backfill");
    notifier.notify(
        NotificationLevel::Info,
        "System wake",
        &format!("Checking for missed notes after {:.0} min sleep", slept / 60.0),
    );

    let now = Local::now().naive_local();
    if let Err(err) = backfill.run(summarizer.as_ref(), notifier.as_ref(), now).await {
        error!(error = %err, "wake backfill failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    struct FlakyService {
        running: AtomicBool,
        restarts: AtomicU32,
        recover: bool,
    }

    impl FlakyService {
        fn new(running: bool, recover: bool) -> Self {
            Self {
                running: AtomicBool::new(running),
                restarts: AtomicU32::new(0),
                recover,
            }
        }
    }

    #[async_trait]
    impl Supervised for FlakyService {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn restart(&self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if self.recover {
                self.running.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct CountingNotifier {
        criticals: AtomicU32,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, level: NotificationLevel, _title: &str, _body: &str) {
            if level == NotificationLevel::Critical {
                self.criticals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn wake_threshold_is_five_minutes() {
        // A 4-minute nap does not trigger backfill; 6 minutes does.
        assert!(!wake_triggers_backfill(Duration::from_secs(4 * 60)));
        assert!(!wake_triggers_backfill(Duration::from_secs(300)));
        assert!(wake_triggers_backfill(Duration::from_secs(6 * 60)));
    }

    #[tokio::test]
    async fn dead_service_gets_restarted() {
        let registry = Arc::new(ServiceRegistry::new());
        let service = Arc::new(FlakyService::new(false, true));
        registry.register("capture");
        registry.set_state("capture", ServiceState::Running);

        let notifier: Arc<dyn Notifier> =
            Arc::new(CountingNotifier { criticals: AtomicU32::new(0) });
        let services: Vec<Arc<dyn Supervised>> = vec![service.clone()];

        health_check(&registry, &services, &notifier).await;

        assert_eq!(service.restarts.load(Ordering::SeqCst), 1);
        assert!(service.is_running());
        assert_eq!(registry.status("capture").unwrap().state, ServiceState::Running);
    }

    #[tokio::test]
    async fn exhausted_restarts_mark_failed_and_notify_critical() {
        let registry = Arc::new(ServiceRegistry::new());
        let service = Arc::new(FlakyService::new(false, false));
        registry.register("capture");
        registry.set_state("capture", ServiceState::Running);

        let counting = Arc::new(CountingNotifier { criticals: AtomicU32::new(0) });
        let notifier: Arc<dyn Notifier> = counting.clone();
        let services: Vec<Arc<dyn Supervised>> = vec![service.clone()];

        // Restarts never recover; the fourth check hits the cap.
        for _ in 0..5 {
            health_check(&registry, &services, &notifier).await;
        }

        assert_eq!(registry.status("capture").unwrap().state, ServiceState::Failed);
        assert_eq!(counting.criticals.load(Ordering::SeqCst), 1);
        // Failed services are no longer probed.
        let before = service.restarts.load(Ordering::SeqCst);
        health_check(&registry, &services, &notifier).await;
        assert_eq!(service.restarts.load(Ordering::SeqCst), before);
    }
}
