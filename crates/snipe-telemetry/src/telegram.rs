//! Telegram notifier.
//!
//! Forwards notifications to a chat through the Bot API `sendMessage` call.
//! The sink itself only enqueues; a background worker does the HTTP calls so
//! the emitting task never waits on the network. When the queue is full the
//! message is dropped and counted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use snipe_core::{EventSink, LogLevel, NotifyKind};

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::Metrics;

const CHANNEL: &str = "telegram";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_kinds() -> Vec<NotifyKind> {
    vec![NotifyKind::Success, NotifyKind::Warning, NotifyKind::Error]
}

fn default_queue_capacity() -> usize {
    64
}

/// Telegram notifier configuration.
///
/// Disabled unless both `bot_token` and `chat_id` are set.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Bot API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Notification kinds that are forwarded.
    #[serde(default = "default_kinds")]
    pub kinds: Vec<NotifyKind>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_api_base(),
            kinds: default_kinds(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("kinds", &self.kinds)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl TelegramConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }

    fn send_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.bot_token
        )
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Text sent for one notification.
pub fn format_message(kind: NotifyKind, title: &str, message: &str) -> String {
    let tag = match kind {
        NotifyKind::Info => "INFO",
        NotifyKind::Success => "SUCCESS",
        NotifyKind::Warning => "WARNING",
        NotifyKind::Error => "ERROR",
    };
    format!("[{tag}] {title}\n{message}")
}

/// Event sink forwarding notifications to Telegram.
#[derive(Debug)]
pub struct TelegramSink {
    tx: mpsc::Sender<String>,
    kinds: Vec<NotifyKind>,
}

impl TelegramSink {
    /// Start the delivery worker and return the sink feeding it.
    ///
    /// The worker exits once the sink is dropped and the queue is drained.
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: TelegramConfig) -> TelemetryResult<(Arc<Self>, JoinHandle<()>)> {
        if !config.is_enabled() {
            return Err(TelemetryError::Notifier(
                "telegram bot_token and chat_id are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::Notifier(format!("Failed to create HTTP client: {e}")))?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let sink = Arc::new(Self {
            tx,
            kinds: config.kinds.clone(),
        });
        let handle = tokio::spawn(deliver(client, config, rx));

        Ok((sink, handle))
    }

    fn enqueue(&self, text: String) {
        match self.tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                Metrics::notification(CHANNEL, "dropped");
                warn!("Telegram queue full, notification dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Metrics::notification(CHANNEL, "dropped");
            }
        }
    }
}

impl EventSink for TelegramSink {
    fn on_log(&self, _level: LogLevel, _message: &str, _timestamp: DateTime<Utc>) {}

    fn on_notify(&self, kind: NotifyKind, title: &str, message: &str, _timestamp: DateTime<Utc>) {
        if self.kinds.contains(&kind) {
            self.enqueue(format_message(kind, title, message));
        }
    }
}

async fn deliver(client: Client, config: TelegramConfig, mut rx: mpsc::Receiver<String>) {
    let url = config.send_url();

    while let Some(text) = rx.recv().await {
        let body = SendMessage {
            chat_id: &config.chat_id,
            text: &text,
            disable_web_page_preview: true,
        };

        match client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                Metrics::notification(CHANNEL, "sent");
                debug!("Telegram notification sent");
            }
            Ok(response) => {
                Metrics::notification(CHANNEL, "failed");
                warn!(status = response.status().as_u16(), "Telegram rejected notification");
            }
            Err(e) => {
                Metrics::notification(CHANNEL, "failed");
                // The URL embeds the bot token; log the error kind only.
                warn!(timeout = e.is_timeout(), connect = e.is_connect(), "Telegram delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;

    type Inbox = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn send_message(
        State(inbox): State<Inbox>,
        Path(bot): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        inbox.lock().push((bot, body));
        Json(serde_json::json!({"ok": true}))
    }

    async fn spawn_fake_bot_api() -> (Inbox, String) {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/{bot}/sendMessage", post(send_message))
            .with_state(inbox.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (inbox, format!("http://{addr}"))
    }

    #[test]
    fn test_disabled_without_token() {
        let config = TelegramConfig::default();
        assert!(!config.is_enabled());

        let config = TelegramConfig {
            bot_token: "123:secret-token".to_string(),
            ..Default::default()
        };
        assert!(!config.is_enabled());
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[test]
    fn test_format_message() {
        assert_eq!(
            format_message(NotifyKind::Success, "Order placed", "order 42"),
            "[SUCCESS] Order placed\norder 42"
        );
    }

    #[tokio::test]
    async fn test_spawn_requires_config() {
        assert!(TelegramSink::spawn(TelegramConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_forwards_selected_kinds() {
        let (inbox, api_base) = spawn_fake_bot_api().await;
        let config = TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100200".to_string(),
            api_base,
            ..Default::default()
        };

        let (sink, handle) = TelegramSink::spawn(config).unwrap();
        let now = Utc::now();
        sink.on_notify(NotifyKind::Info, "Monitoring started", "x", now);
        sink.on_notify(NotifyKind::Success, "Server available", "rbx", now);
        sink.on_log(LogLevel::Error, "ignored", now);

        // Dropping the only sender lets the worker drain and exit.
        drop(sink);
        handle.await.unwrap();

        let inbox = inbox.lock();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].0, "bot123:abc");
        assert_eq!(inbox[0].1["chat_id"], "-100200");
        assert_eq!(inbox[0].1["text"], "[SUCCESS] Server available\nrbx");
    }
}
