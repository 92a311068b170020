//! `LookoutServer`: axum HTTP + WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{Json, Response};
use axum::routing::get;
use lookout_inspector::{ContentWindow, InspectorOptions, WalkerOptions};
use lookout_settings::LookoutSettings;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::health::{self, HealthResponse};
use crate::session::run_session;

struct Shared {
    targets: Arc<[Arc<dyn ContentWindow>]>,
    inspector: InspectorOptions,
    max_message_size: usize,
    outbound_queue_warn: usize,
    next_connection: AtomicU64,
    active: AtomicUsize,
    shutdown: CancellationToken,
    start_time: Instant,
}

/// Shared state accessible from axum handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Shared>,
}

/// Decrements the live connection count when dropped.
pub struct ConnectionGuard {
    shared: Arc<Shared>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.shared.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AppState {
    /// Documents offered to every connection.
    pub fn targets(&self) -> Arc<[Arc<dyn ContentWindow>]> {
        self.shared.targets.clone()
    }

    /// Options for inspectors created by tab actors.
    pub fn inspector_options(&self) -> InspectorOptions {
        self.shared.inspector
    }

    /// Outbound backlog above which sessions warn.
    pub fn outbound_queue_warn(&self) -> usize {
        self.shared.outbound_queue_warn
    }

    /// Cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Count a connection as live until the guard drops.
    pub fn track_connection(&self) -> ConnectionGuard {
        let _ = self.shared.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            shared: self.shared.clone(),
        }
    }

    fn next_prefix(&self) -> String {
        format!("conn{}", self.shared.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}

/// The Lookout server.
pub struct LookoutServer {
    settings: LookoutSettings,
    state: AppState,
}

impl LookoutServer {
    /// Create a server offering `targets` as tabs.
    pub fn new(settings: LookoutSettings, targets: Vec<Arc<dyn ContentWindow>>) -> Self {
        let inspector = InspectorOptions {
            walker: WalkerOptions {
                watch_visited: settings.inspector.watch_visited,
            },
            default_max_nodes: settings.inspector.default_max_nodes,
        };
        let shared = Shared {
            targets: targets.into(),
            inspector,
            max_message_size: settings.server.max_message_size,
            outbound_queue_warn: settings.server.outbound_queue_warn,
            next_connection: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        };
        Self {
            settings,
            state: AppState {
                shared: Arc::new(shared),
            },
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    /// Get the shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server settings.
    pub fn settings(&self) -> &LookoutSettings {
        &self.settings
    }

    /// Token that stops the server and every session when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown_token()
    }

    /// Bind the configured host and port.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind((self.settings.server.host.as_str(), self.settings.server.port)).await
    }

    /// Serve on `listener` until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, tabs = self.state.shared.targets.len(), "lookout server listening");
        let shutdown = self.shutdown_token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.shared.start_time,
        state.connection_count(),
        state.shared.targets.len(),
    ))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let prefix = state.next_prefix();
    ws.max_message_size(state.shared.max_message_size)
        .on_upgrade(move |socket| run_session(socket, prefix, state))
}
