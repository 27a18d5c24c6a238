//! Notification delivery.
//!
//! The core's contract is `(title, body, level)`. This implementation logs
//! through `tracing` and forwards to an optional channel so the IPC surface
//! can relay notifications to the UI process, which owns actual toast
//! delivery (and plays a sound for error/critical).

use serde::Serialize;
use trace_core::notify::{NotificationLevel, Notifier};

/// A notification as forwarded to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
    pub sound: bool,
}

/// Tracing-backed notifier with an optional forwarding channel.
pub struct ChannelNotifier {
    forward: Option<tokio::sync::mpsc::UnboundedSender<Notification>>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { forward: Some(tx) }, rx)
    }

    /// Log-only notifier with nothing listening.
    pub fn log_only() -> Self {
        Self { forward: None }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, level: NotificationLevel, title: &str, body: &str) {
        match level {
            NotificationLevel::Info => tracing::info!(title, body, "notification"),
            NotificationLevel::Warning => tracing::warn!(title, body, "notification"),
            NotificationLevel::Error | NotificationLevel::Critical => {
                tracing::error!(title, body, ?level, "notification");
            }
        }

        if let Some(forward) = &self.forward {
            let _ = forward.send(Notification {
                level,
                title: title.to_string(),
                body: body.to_string(),
                sound: level.with_sound(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_notifications_with_sound_flag() {
        let (notifier, mut rx) = ChannelNotifier::new();

        notifier.notify(NotificationLevel::Info, "Backfill", "3 notes");
        notifier.notify(NotificationLevel::Critical, "Capture failed", "max restarts");

        let info = rx.recv().await.unwrap();
        assert!(!info.sound);
        assert_eq!(info.title, "Backfill");

        let critical = rx.recv().await.unwrap();
        assert!(critical.sound);
    }

    #[test]
    fn log_only_does_not_panic() {
        ChannelNotifier::log_only().notify(NotificationLevel::Warning, "t", "b");
    }
}
