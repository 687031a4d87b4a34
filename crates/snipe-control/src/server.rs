//! HTTP control server using axum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use snipe_monitor::Session;
use snipe_telemetry::Metrics;

use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{ActionResponse, HealthResponse, StreamMessage};

/// Caps concurrent event stream connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

/// Holds one connection slot until dropped.
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Session>,
    connection_limiter: Arc<ConnectionLimiter>,
    config: ControlConfig,
}

impl AppState {
    pub fn new(session: Arc<Session>, config: ControlConfig) -> Self {
        Self {
            session,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> ControlResult<()> {
        if self.config.auth_enabled() && !check_basic_auth(headers, &self.config) {
            return Err(ControlError::Unauthorized);
        }
        Ok(())
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> ControlResult<Router> {
    let cors = cors_layer(&state.config.cors_origins)?;

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/monitor/start", post(start_monitoring))
        .route("/api/monitor/stop", post(stop_monitoring))
        .route("/api/loop/start", post(start_loop))
        .route("/api/loop/stop", post(stop_loop))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .with_state(state);

    Ok(match cors {
        Some(cors) => router.layer(cors),
        None => router,
    })
}

/// Build the CORS layer. No origins means no CORS headers at all.
fn cors_layer(origins: &[String]) -> ControlResult<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }
    if origins.iter().any(|o| o == "*") {
        return Ok(Some(CorsLayer::permissive()));
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| ControlError::Config(format!("invalid CORS origin: {o}")))
        })
        .collect::<ControlResult<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    ))
}

/// Liveness probe. Never requires auth.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        monitoring: state.session.is_monitoring().await,
    })
}

async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ControlResult<Json<snipe_monitor::SessionStatus>> {
    state.authorize(&headers)?;
    Ok(Json(state.session.status().await))
}

async fn start_monitoring(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ControlResult<Json<ActionResponse>> {
    state.authorize(&headers)?;
    state.session.start_monitoring().await?;
    info!("Monitoring started from control API");
    Ok(Json(ActionResponse::ok("Monitoring started")))
}

async fn stop_monitoring(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ControlResult<Json<ActionResponse>> {
    state.authorize(&headers)?;
    state.session.stop_monitoring().await;
    info!("Monitoring stopped from control API");
    Ok(Json(ActionResponse::ok("Monitoring stopped")))
}

async fn start_loop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ControlResult<Json<ActionResponse>> {
    state.authorize(&headers)?;
    state.session.start_loop().await?;
    Ok(Json(ActionResponse::ok("Purchase loop started")))
}

async fn stop_loop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ControlResult<Json<ActionResponse>> {
    state.authorize(&headers)?;
    state.session.stop_loop().await;
    Ok(Json(ActionResponse::ok("Purchase loop stopped")))
}

/// Prometheus text exposition.
async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> ControlResult<Response> {
    state.authorize(&headers)?;
    let body = Metrics::render().map_err(|e| ControlError::Metrics(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// WebSocket upgrade handler for the event stream.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = state.authorize(&headers) {
        return e.into_response();
    }

    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            current = state.connection_limiter.current_count(),
            max = state.config.max_connections,
            "Event stream connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    info!(
        connections = state.connection_limiter.current_count(),
        "New event stream connection"
    );

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, guard))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut WsSender, message: &StreamMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream message");
            true
        }
    }
}

/// Forward core events and status changes to one client.
async fn handle_ws_connection(socket: WebSocket, state: AppState, _guard: ConnectionGuard) {
    let (mut sender, mut receiver) = socket.split();

    let mut events_rx = state.session.emitter().subscribe();
    let mut availability_rx = state.session.subscribe_availability();
    let mut loop_rx = state.session.subscribe_loop();

    let initial = StreamMessage::Status(state.session.status().await);
    if !send_message(&mut sender, &initial).await {
        debug!("Failed to send initial status, client disconnected");
        return;
    }

    let mut incoming_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    debug!("Client sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    loop {
        let message = tokio::select! {
            result = events_rx.recv() => match result {
                Ok(record) => StreamMessage::Event(record),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event stream client lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = availability_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                StreamMessage::Status(state.session.status().await)
            }
            changed = loop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                StreamMessage::Status(state.session.status().await)
            }
            _ = &mut incoming_task => {
                debug!("Incoming task completed, closing connection");
                break;
            }
        };

        if !send_message(&mut sender, &message).await {
            debug!("Failed to send message, client disconnected");
            break;
        }
    }

    incoming_task.abort();
    info!(
        connections = state.connection_limiter.current_count().saturating_sub(1),
        "Event stream connection closed"
    );
}

/// Check basic authentication.
fn check_basic_auth(headers: &HeaderMap, config: &ControlConfig) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };

    match base64_decode(encoded.trim()) {
        Some(decoded) => decoded == format!("{}:{}", config.username, config.password),
        None => false,
    }
}

/// Minimal standard-alphabet base64 decode for basic auth credentials.
fn base64_decode(input: &str) -> Option<String> {
    fn sextet(c: u8) -> Option<u32> {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            _ => return None,
        };
        Some(u32::from(value))
    }

    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut buf = 0u32;
    let mut bits = 0u32;

    for c in input.bytes() {
        buf = (buf << 6) | sextet(c)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push(((buf >> bits) & 0xFF) as u8);
        }
    }

    String::from_utf8(out).ok()
}

/// Serve the control API on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    session: Arc<Session>,
    config: ControlConfig,
    shutdown: CancellationToken,
) -> ControlResult<()> {
    let app = create_router(AppState::new(session, config))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Bind the configured address and run the control server.
pub async fn run_server(
    session: Arc<Session>,
    config: ControlConfig,
    shutdown: CancellationToken,
) -> ControlResult<()> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
    info!(
        bind = %config.bind,
        port = config.port,
        auth = config.auth_enabled(),
        "Starting control server"
    );
    serve(listener, session, config, shutdown).await
}
