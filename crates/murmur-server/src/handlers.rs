//! Connection handlers for the murmur server.
//!
//! This module handles WebSocket admission and the per-connection receive
//! loop. Everything after admission is the hub's business.

use crate::auth::{AuthError, TokenAuthenticator};
use crate::config::{Config, UserSeed};
use crate::metrics::{self, ConnectionMetricsGuard, MeteredTransport, MetricsNotifier};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use murmur_core::{Connection, Hub};
use murmur_protocol::{CloseCode, Identity};
use murmur_store::{EventStore, SqliteStore, User};
use murmur_transport::WebSocketTransport;
use serde::Deserialize;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub hub: Hub,
    pub auth: TokenAuthenticator,
    pub config: Config,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn EventStore>) -> Self {
        Self {
            hub: Hub::with_notifier(store, config.hub_config(), Arc::new(MetricsNotifier)),
            auth: TokenAuthenticator::new(&config.auth.tokens),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// Write configured display names to the store.
///
/// # Errors
///
/// Returns an error if a write fails.
pub async fn seed_users(store: &SqliteStore, users: &[UserSeed]) -> Result<()> {
    for seed in users {
        let user = User {
            id: seed.id,
            username: seed.username.clone(),
            nickname: seed.nickname.clone().unwrap_or_else(|| seed.username.clone()),
        };
        store
            .upsert_user(user)
            .await
            .with_context(|| format!("Failed to seed user {}", seed.id))?;
    }
    if !users.is_empty() {
        info!(count = users.len(), "Seeded users");
    }
    Ok(())
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = SqliteStore::open(std::path::Path::new(&config.store.path))
        .with_context(|| format!("Failed to open store at {}", config.store.path))?;
    seed_users(&store, &config.users).await?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, Arc::new(store)));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("murmur server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{user_id}}?token=...",
        addr, state.config.transport.websocket_path
    );

    let shutdown_state = Arc::clone(&state);
    axum::serve(
        listener,
        build_app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
        shutdown_state.hub.shutdown().await;
    })
    .await?;

    Ok(())
}

/// Serve `state` on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(
        listener,
        build_app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ws_route = state.config.websocket_route();
    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": state.hub.registry().len(),
    }))
}

/// WebSocket upgrade handler.
///
/// The socket is always upgraded so a refused client still gets a close code.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let admission = state.auth.authenticate(&user_id, query.token.as_deref());
    ws.on_upgrade(move |socket| async move {
        match admission {
            Ok(identity) => handle_websocket(socket, state, identity, remote_addr).await,
            Err(e) => reject(socket, &user_id, &e).await,
        }
    })
}

async fn reject(mut socket: WebSocket, user_id: &str, reason: &AuthError) {
    warn!(user_id, "Connection refused: {}", reason);
    metrics::record_rejected_connection();

    let code = CloseCode::PolicyViolation;
    let frame = CloseFrame {
        code: code.code(),
        reason: Cow::Borrowed(code.reason()),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(user_id, "Failed to send close frame: {}", e);
    }
}

/// Handle an admitted WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Identity,
    remote_addr: SocketAddr,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sink, mut stream) = socket.split();
    let transport = MeteredTransport::new(WebSocketTransport::new(sink, Some(remote_addr)));
    let conn = state.hub.connect(identity, Box::new(transport)).await;

    debug!(identity, connection = %conn.id(), remote = %remote_addr, "WebSocket connected");

    loop {
        let msg = tokio::select! {
            () = conn.closed() => {
                debug!(connection = %conn.id(), "Closed by server");
                break;
            }
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => handle_text(&state, &conn, &text).await,
            Some(Ok(Message::Binary(data))) => {
                warn!(
                    connection = %conn.id(),
                    bytes = data.len(),
                    "Binary frames are not supported"
                );
                metrics::record_error("protocol");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Transport-level keepalive; axum answers pings itself.
            }
            Some(Ok(Message::Close(_))) => {
                debug!(connection = %conn.id(), "Received close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(connection = %conn.id(), error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!(connection = %conn.id(), "WebSocket stream ended");
                break;
            }
        }
    }

    if !state.hub.disconnect(&conn).await {
        metrics::record_eviction();
    }
    debug!(identity, connection = %conn.id(), "WebSocket disconnected");
}

/// Decode and route one text frame. Failures are logged and counted; the
/// loop always moves on to the next frame.
async fn handle_text(state: &AppState, conn: &Connection, text: &str) {
    let start = Instant::now();

    let Ok(frame) = state.hub.decode_frame(conn, text) else {
        metrics::record_error("protocol");
        return;
    };
    metrics::record_frame(frame.frame_type().as_str(), text.len());

    if let Err(e) = state.hub.handle_frame(conn, frame).await {
        metrics::record_error(if e.is_rejection() { "rejected" } else { "store" });
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}
