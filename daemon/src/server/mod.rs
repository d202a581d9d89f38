//! WebSocket/HTTP server
//!
//! - `/` and `/triggers`: trigger listeners; each trigger arrives as one
//!   text frame holding the trigger string
//! - `/session`: status frames out, UI input events in
//! - `/status`: JSON snapshot of the daemon

mod protocol;
mod status;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::bridge::ListenerRegistry;
use crate::session::{InputDispatcher, InputEvent};

pub use protocol::{DaemonStatus, SessionFrame};
pub use status::StatusBoard;

/// Shared handler state
#[derive(Clone)]
struct AppState {
    registry: Arc<ListenerRegistry>,
    dispatcher: Option<InputDispatcher>,
    status: StatusBoard,
    started_at: Instant,
}

/// Server accepting listener and session connections
pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    /// Bind the listen address. `dispatcher` is `None` when the session
    /// runs in the browser instead of this process.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ListenerRegistry>,
        dispatcher: Option<InputDispatcher>,
        status: StatusBoard,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(addr = %listener.local_addr()?, "server listening");

        Ok(Self {
            listener,
            state: AppState {
                registry,
                dispatcher,
                status,
                started_at: Instant::now(),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<()> {
        axum::serve(self.listener, router(self.state))
            .await
            .context("server failed")
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(trigger_upgrade))
        .route("/triggers", get(trigger_upgrade))
        .route("/session", get(session_upgrade))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<DaemonStatus> {
    let view = state.status.current().await;
    Json(DaemonStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_enabled: state.dispatcher.is_some(),
        state: view.state,
        busy: view.state.is_active(),
        listeners: state.registry.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        status: view,
    })
}

async fn trigger_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_trigger_socket(socket, state.registry))
}

/// Forward trigger frames until the client leaves or the registry drops us
async fn handle_trigger_socket(socket: WebSocket, registry: Arc<ListenerRegistry>) {
    let (id, mut frames) = registry.attach();
    let (mut sender, mut receiver) = socket.split();
    info!(%id, "trigger listener connected");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        debug!(%id, "send failed");
                        break;
                    }
                }
                // Pruned by the registry
                None => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.detach(id);
    info!(%id, "trigger listener disconnected");
}

async fn session_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_socket(socket, state))
}

/// Stream status to a UI client and feed its input to the dispatcher
async fn handle_session_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.status.subscribe();
    debug!("session client connected");

    let current = state.status.current().await;
    if send_json(&mut sender, &SessionFrame::Status(current)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(view) => {
                    if send_json(&mut sender, &SessionFrame::Status(view)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "session client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(frame) = route_input(state.dispatcher.as_ref(), text.as_str()) {
                        if send_json(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("session client disconnected");
}

/// Parse one inbound frame and hand it to the dispatcher.
/// Returns the error frame to send back, if any.
fn route_input(dispatcher: Option<&InputDispatcher>, text: &str) -> Result<bool, SessionFrame> {
    let event: InputEvent = serde_json::from_str(text)
        .map_err(|e| SessionFrame::error("bad_input", e.to_string()))?;

    let dispatcher = dispatcher.ok_or_else(|| {
        SessionFrame::error("session_disabled", "voice session is not running in the daemon")
    })?;

    Ok(dispatcher.dispatch(&event))
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &T,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to encode frame");
            Ok(())
        }
    }
}
