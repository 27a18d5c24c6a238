//! Service state registry used by the supervisor.
//!
//! Pure lifecycle accounting for the three named services (`capture`,
//! `hourly`, `daily`): state transitions, restart attempt counting against
//! the cap, and health snapshots. The supervisor drives actual starts and
//! stops; this registry only records them. Restart counters persist for the
//! process lifetime only.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use trace_domain::constants::MAX_RESTART_ATTEMPTS;

/// Lifecycle states of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Failed,
}

/// Status snapshot of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// Decision for a failed health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Attempt restart number `attempt` (1-based).
    Retry { attempt: u32 },
    /// The cap is exhausted; the service is now `Failed`.
    GiveUp,
}

/// Thread-safe registry of service statuses.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: Mutex<BTreeMap<String, ServiceStatus>>,
    max_restart_attempts: u32,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self { services: Mutex::new(BTreeMap::new()), max_restart_attempts: MAX_RESTART_ATTEMPTS }
    }

    #[cfg(test)]
    fn with_cap(max_restart_attempts: u32) -> Self {
        Self { services: Mutex::new(BTreeMap::new()), max_restart_attempts }
    }

    /// Register a service in the `Stopped` state. Idempotent.
    pub fn register(&self, name: &str) {
        let mut services = self.lock();
        services.entry(name.to_string()).or_insert_with(|| ServiceStatus {
            name: name.to_string(),
            state: ServiceState::Stopped,
            restart_count: 0,
            last_error: None,
        });
    }

    pub fn set_state(&self, name: &str, state: ServiceState) {
        let mut services = self.lock();
        if let Some(status) = services.get_mut(name) {
            status.state = state;
            if state == ServiceState::Running {
                status.last_error = None;
            }
        }
    }

    pub fn record_error(&self, name: &str, error: &str) {
        let mut services = self.lock();
        if let Some(status) = services.get_mut(name) {
            status.last_error = Some(error.to_string());
        }
    }

    /// Account for a failed health check: either authorize another restart
    /// attempt or mark the service failed.
    pub fn restart_decision(&self, name: &str) -> RestartDecision {
        let mut services = self.lock();
        let Some(status) = services.get_mut(name) else {
            return RestartDecision::GiveUp;
        };

        if status.restart_count >= self.max_restart_attempts {
            status.state = ServiceState::Failed;
            return RestartDecision::GiveUp;
        }

        status.restart_count += 1;
        status.state = ServiceState::Restarting;
        RestartDecision::Retry { attempt: status.restart_count }
    }

    /// Clear the restart counter after a confirmed healthy run.
    pub fn reset_restarts(&self, name: &str) {
        let mut services = self.lock();
        if let Some(status) = services.get_mut(name) {
            status.restart_count = 0;
        }
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        self.lock().values().cloned().collect()
    }

    /// Names of services currently in states the health check must probe.
    pub fn supervised_names(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|s| !matches!(s.state, ServiceState::Stopped | ServiceState::Failed))
            .map(|s| s.name.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ServiceStatus>> {
        match self.services.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
