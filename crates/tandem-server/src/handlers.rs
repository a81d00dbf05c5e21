//! Connection handlers for Tandem server.
//!
//! This module handles the HTTP entry point and the per-connection session
//! lifecycle: one inbound loop and one outbound loop per WebSocket.

use crate::config::{Config, HeartbeatConfig};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tandem_core::{
    validate_group_name, Egress, MatchError, Matchmaker, MatchmakerConfig, Pairing, Session,
    SessionStatus,
};
use tandem_protocol::{codec, Event};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The pairing coordinator.
    pub matchmaker: Matchmaker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let matchmaker_config = MatchmakerConfig {
            max_groups: config.matchmaking.max_groups,
        };

        Self {
            matchmaker: Matchmaker::with_config(matchmaker_config),
            config,
        }
    }
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Group to join.
    pub group: Option<String>,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tandem server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?group=<name>",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Matchmaker statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.matchmaker.stats())
}

/// WebSocket upgrade handler.
///
/// Rejects requests without a valid `group` with `400` and requests from
/// origins outside the allow-list with `403`.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(group) = params.group.filter(|g| !g.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing group").into_response();
    };

    if let Err(reason) = validate_group_name(&group) {
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }

    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.transport.origin_allowed(origin) {
        warn!(origin = ?origin, "Rejected WebSocket origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, group))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, group: String) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (session, egress) = Session::new(group);
    let status = session.subscribe();
    let id = session.id();

    match state.matchmaker.attach(&session) {
        Ok(Pairing::Paired(partner)) => {
            debug!(session = %id, partner = %partner, "WebSocket connected and paired");
        }
        Ok(Pairing::Waiting) => {
            debug!(session = %id, group = %session.group(), "WebSocket connected, waiting");
        }
        Err(e) => {
            warn!(session = %id, error = %e, "Failed to attach session");
            metrics::record_error(error_kind(&e));
            state.matchmaker.remove_client(&session);
            return;
        }
    }
    metrics::set_matchmaker_stats(&state.matchmaker.stats());

    let (sender, receiver) = socket.split();

    // Either loop ending tears the session down
    tokio::select! {
        () = read_loop(receiver, &session, &state) => {}
        () = write_loop(sender, egress, status, &session, &state.config.heartbeat) => {}
    }

    state.matchmaker.remove_client(&session);
    metrics::set_matchmaker_stats(&state.matchmaker.stats());

    debug!(session = %id, "WebSocket disconnected");
}

/// Read inbound frames until the peer goes away or misses its heartbeat.
async fn read_loop(mut receiver: SplitStream<WebSocket>, session: &Arc<Session>, state: &AppState) {
    let id = session.id();
    let pong_wait = state.config.heartbeat.timeout();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let message = match tokio::time::timeout_at(deadline, receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                warn!(session = %id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                return;
            }
            Ok(None) => {
                debug!(session = %id, "WebSocket stream ended");
                return;
            }
            Err(_) => {
                info!(session = %id, "Heartbeat timed out");
                metrics::record_error("heartbeat");
                return;
            }
        };

        match message {
            Message::Text(text) => handle_payload(text.as_bytes(), session, state),
            Message::Binary(data) => handle_payload(&data, session, state),
            Message::Pong(_) => {
                trace!(session = %id, "pong");
                deadline = Instant::now() + pong_wait;
            }
            Message::Ping(_) => {
                // Answered by the WebSocket layer
            }
            Message::Close(_) => {
                debug!(session = %id, "Received close frame");
                return;
            }
        }
    }
}

/// Decode and route one inbound payload. Malformed payloads are skipped.
fn handle_payload(data: &[u8], session: &Arc<Session>, state: &AppState) {
    let start = std::time::Instant::now();
    metrics::record_message(data.len(), "inbound");

    let event = match codec::decode(data) {
        Ok(event) => event,
        Err(e) => {
            warn!(session = %session.id(), error = %e, "Skipping malformed event");
            metrics::record_error("decode");
            return;
        }
    };

    if let Err(e) = state.matchmaker.route_event(&event, session) {
        warn!(
            session = %session.id(),
            event = %event.kind,
            error = %e,
            "Event handling failed"
        );
        metrics::record_error(error_kind(&e));
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Deliver egress events and heartbeat pings until the session closes.
///
/// Delivery is not held back while the session waits for a partner: a
/// waiting session still receives `partner_left` after its pair dissolves,
/// and pings must keep flowing or the peer's pong deadline lapses. The
/// match itself arrives as the `partner_found` event.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut egress: Egress,
    mut status: watch::Receiver<SessionStatus>,
    session: &Session,
    heartbeat: &HeartbeatConfig,
) {
    let id = session.id();
    let period = heartbeat.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;

            event = egress.recv() => {
                let Some(event) = event else {
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                };
                if send_event(&mut sender, &event, session).await.is_err() {
                    return;
                }
            }

            changed = status.changed() => {
                let closed = changed.is_err()
                    || matches!(*status.borrow_and_update(), SessionStatus::Closed);
                if closed {
                    // Flush what the partner already sent before closing
                    while let Ok(event) = egress.try_recv() {
                        if send_event(&mut sender, &event, session).await.is_err() {
                            return;
                        }
                    }
                    debug!(session = %id, "Session closed, sending close frame");
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            }

            _ = ticker.tick() => {
                trace!(session = %id, "ping");
                if let Err(e) = sender.send(Message::Ping(Vec::new())).await {
                    debug!(session = %id, error = %e, "Failed to send ping");
                    return;
                }
            }
        }
    }
}

/// Encode an event and write it as a text frame.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
    session: &Session,
) -> Result<(), axum::Error> {
    let text = match codec::encode(event) {
        Ok(text) => text,
        Err(e) => {
            error!(session = %session.id(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            return Ok(());
        }
    };

    metrics::record_message(text.len(), "outbound");
    sender.send(Message::Text(text)).await.map_err(|e| {
        debug!(session = %session.id(), error = %e, "Failed to send event");
        e
    })
}

/// Metric label for a matchmaking error.
fn error_kind(error: &MatchError) -> &'static str {
    match error {
        MatchError::InvalidGroup(_) => "invalid_group",
        MatchError::GroupLimitReached => "group_limit",
        MatchError::NoHandler(_) => "no_handler",
        MatchError::MalformedPayload(_) => "malformed_payload",
        MatchError::NoPartner => "no_partner",
        MatchError::Disconnected(_) => "disconnected",
    }
}
