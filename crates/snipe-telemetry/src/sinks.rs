//! Event sink that writes core events to the tracing subscriber.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use snipe_core::{EventSink, LogLevel, NotifyKind};

/// Mirrors every core event into the structured log.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    /// Session label added to every line (usually the watched resource).
    session: String,
}

impl TracingSink {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn on_log(&self, level: LogLevel, message: &str, timestamp: DateTime<Utc>) {
        let session = self.session.as_str();
        match level {
            LogLevel::Info => info!(session, %timestamp, "{message}"),
            LogLevel::Success => info!(session, %timestamp, success = true, "{message}"),
            LogLevel::Warning => warn!(session, %timestamp, "{message}"),
            LogLevel::Error => error!(session, %timestamp, "{message}"),
        }
    }

    fn on_notify(&self, kind: NotifyKind, title: &str, message: &str, timestamp: DateTime<Utc>) {
        let session = self.session.as_str();
        match kind {
            NotifyKind::Error => error!(session, %timestamp, %kind, title, "{message}"),
            NotifyKind::Warning => warn!(session, %timestamp, %kind, title, "{message}"),
            NotifyKind::Info | NotifyKind::Success => {
                info!(session, %timestamp, %kind, title, "{message}")
            }
        }
    }
}
