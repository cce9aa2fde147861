//! Outbound notifications (reviewer pings, reminders, low-stock alerts).
//!
//! Sending is best-effort: the trait has no error channel, and callers only
//! send after their state change is committed.

use std::sync::Mutex;

use tracing::info;

pub trait NotificationSink: Send + Sync {
    fn send(&self, text: &str);
}

/// Writes notifications to the log. Default sink for the daemon.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn send(&self, text: &str) {
        info!(target: "stockhold::notify", message = %text, "notification");
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<String>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn send(&self, text: &str) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(text.to_string()),
            Err(poisoned) => poisoned.into_inner().push(text.to_string()),
        }
    }
}
