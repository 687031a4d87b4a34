//! Outbound event stream.
//!
//! The poller and the orchestrator never talk to a UI, a log file or a chat
//! channel directly. They hand `Event`s to an [`EventEmitter`], which stamps
//! them and fans them out to every registered [`EventSink`] plus any live
//! broadcast subscribers. Nothing is retained after emission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast buffer for live subscribers (control API, tests).
const BROADCAST_CAPACITY: usize = 256;

/// Log line severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event produced by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        level: LogLevel,
        message: String,
    },
    Notify {
        kind: NotifyKind,
        title: String,
        message: String,
    },
}

/// An emitted event with its identity and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    fn stamp(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Consumer of core events (UI, log file, chat bridge...).
///
/// Called synchronously on the emitting task: implementations must not block.
/// Anything slow (network delivery) should be handed off to a spawned task.
pub trait EventSink: Send + Sync {
    fn on_log(&self, level: LogLevel, message: &str, timestamp: DateTime<Utc>);

    fn on_notify(&self, kind: NotifyKind, title: &str, message: &str, timestamp: DateTime<Utc>);
}

struct EmitterInner {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    tx: broadcast::Sender<EventRecord>,
}

/// Fan-out point for core events.
///
/// Cheap to clone; all clones share the same sinks and subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sinks", &self.inner.sinks.read().len())
            .field("subscribers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(EmitterInner {
                sinks: RwLock::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Register a sink. Sinks receive every event emitted after registration.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().push(sink);
    }

    /// Drop every registered sink. Live subscribers are unaffected.
    pub fn clear_sinks(&self) {
        self.inner.sinks.write().clear();
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.inner.tx.subscribe()
    }

    /// Stamp and deliver an event.
    pub fn emit(&self, event: Event) {
        let record = EventRecord::stamp(event);

        for sink in self.inner.sinks.read().iter() {
            match &record.event {
                Event::Log { level, message } => sink.on_log(*level, message, record.timestamp),
                Event::Notify {
                    kind,
                    title,
                    message,
                } => sink.on_notify(*kind, title, message, record.timestamp),
            }
        }

        // No subscribers is the normal case when nothing is attached.
        let _ = self.inner.tx.send(record);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log {
            level,
            message: message.into(),
        });
    }

    pub fn notify(&self, kind: NotifyKind, title: impl Into<String>, message: impl Into<String>) {
        self.emit(Event::Notify {
            kind,
            title: title.into(),
            message: message.into(),
        });
    }
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Messages of log events at `level`.
    pub fn logs(&self, level: LogLevel) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Log { level: l, message } if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Titles of notifications of `kind`.
    pub fn notifications(&self, kind: NotifyKind) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Notify { kind: k, title, .. } if *k == kind => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn on_log(&self, level: LogLevel, message: &str, _timestamp: DateTime<Utc>) {
        self.events.lock().push(Event::Log {
            level,
            message: message.to_string(),
        });
    }

    fn on_notify(&self, kind: NotifyKind, title: &str, message: &str, _timestamp: DateTime<Utc>) {
        self.events.lock().push(Event::Notify {
            kind,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}
