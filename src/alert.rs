//! User-visible alerts — the engine's substitute for UI toasts.
//!
//! DESIGN
//! ======
//! The engine never talks to a UI directly. Anything a user must see
//! (overwrite warnings, save failures, undo exhaustion) is pushed onto an
//! unbounded channel as a typed [`Alert`]; the embedding UI drains and
//! renders it. Every alert is mirrored to `tracing` so headless runs keep
//! a record.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One message destined for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
}

/// Sending half handed to the dispatcher and resolver.
#[derive(Debug, Clone)]
pub struct Alerts {
    tx: mpsc::UnboundedSender<Alert>,
}

impl Alerts {
    /// Create an alert sink and the receiver the UI drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(Severity::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message.into());
    }

    fn push(&self, severity: Severity, message: String) {
        match severity {
            Severity::Info => info!(alert = %message),
            Severity::Warning => warn!(alert = %message),
            Severity::Error => error!(alert = %message),
        }
        // Receiver dropped means headless operation; the log line above
        // already recorded it.
        let _ = self.tx.send(Alert { severity, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_arrive_in_order() {
        let (alerts, mut rx) = Alerts::channel();
        alerts.warn("first");
        alerts.error("second");

        let a = rx.try_recv().unwrap();
        assert_eq!(a.severity, Severity::Warning);
        assert_eq!(a.message, "first");
        let b = rx.try_recv().unwrap();
        assert_eq!(b.severity, Severity::Error);
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (alerts, rx) = Alerts::channel();
        drop(rx);
        alerts.info("nobody listening");
    }
}
