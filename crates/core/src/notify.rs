//! Notification port.
//!
//! The core's only contract with the platform notifier is "emit a
//! notification with (title, body, level)". Sound and delivery mechanics
//! belong to the implementation.

use serde::{Deserialize, Serialize};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl NotificationLevel {
    /// Only error and critical notifications play a sound.
    pub fn with_sound(&self) -> bool {
        matches!(self, NotificationLevel::Error | NotificationLevel::Critical)
    }
}

/// Platform notification delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, title: &str, body: &str);
}

/// Notifier that drops everything. Used in tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _level: NotificationLevel, _title: &str, _body: &str) {}
}
