//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use lookout_actors::Connection;
use tracing::{debug, error, info, instrument, warn};

use crate::root::RootActor;
use crate::server::AppState;

/// How long queued packets may take to reach the socket after close.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Run a WebSocket session for a connected client.
///
/// 1. Creates a [`Connection`] named `prefix` and starts its scheduler
/// 2. Registers the root actor and sends the greeting
/// 3. Feeds text frames to the connection; writes outbound packets in order
/// 4. On close or server shutdown, tears down every actor and drains
#[instrument(skip_all, fields(conn = %prefix))]
pub async fn run_session(ws: WebSocket, prefix: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (conn, mut outbound, scheduler) = Connection::new(prefix.clone());
    let scheduler = tokio::spawn(scheduler.run());
    let _guard = state.track_connection();
    info!("client connected");

    let root = RootActor::new(&conn, state.targets(), state.inspector_options());
    let root_pool = conn.new_pool();
    conn.add_actor_pool(root_pool.clone());
    if let Err(err) = root_pool.add_actor(root) {
        error!(error = %err, "failed to register root actor");
        conn.close();
        return;
    }
    conn.send(RootActor::greeting());

    let queue_warn = state.outbound_queue_warn();
    let mut writer = tokio::spawn(async move {
        while let Some(packet) = outbound.recv().await {
            let backlog = outbound.len();
            if backlog > queue_warn {
                warn!(backlog, "outbound queue is backing up");
            }
            let text = match packet.to_json() {
                Ok(text) => text,
                Err(err) => {
                    error!(error = %err, from = %packet.from, "failed to encode packet");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let shutdown = state.shutdown_token();
    loop {
        let msg = tokio::select! {
            () = shutdown.cancelled() => {
                info!("server shutting down, closing session");
                break;
            }
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => conn.receive_text(text.as_str()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => conn.receive_text(text),
                Err(_) => warn!(len = data.len(), "received non-UTF8 binary frame"),
            },
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(err)) => {
                debug!(error = %err, "socket read failed");
                break;
            }
            None => break,
        }
    }

    conn.close();
    let _ = scheduler.await;
    let sent = conn.sent_count();
    drop(conn);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(sent, "client disconnected");
}
