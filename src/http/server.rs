//! HTTP server setup for the WebSocket upgrade.
//!
//! # Responsibilities
//! - Create Axum Router with the upgrade handler on every path
//! - Wire up middleware (handshake request tracing)
//! - Serve one accepted stream (plain or TLS) with HTTP/1.1 upgrades
//! - Capture handshake metadata and hand the session to the echo handler

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Extension, State},
    http::{HeaderMap, Request},
    response::Response,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::http::websocket::{handle_session, HandshakeMetadata};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::connection::ConnectionGuard;
use crate::telemetry::Telemetry;

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub telemetry: Arc<Telemetry>,
    pub prefix: Arc<str>,
    pub shutdown: Shutdown,
}

/// Build the Axum router shared by every listener.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(upgrade_handler))
        .route("/{*path}", any(upgrade_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Upgrade the request and start the echo session.
///
/// Non-upgrade requests are rejected by the `WebSocketUpgrade` extractor.
async fn upgrade_handler(
    State(state): State<AppState>,
    Extension(connection): Extension<Arc<ConnectionGuard>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let metadata = HandshakeMetadata {
        connection_id: connection.id(),
        peer,
        transport: connection.transport(),
        headers,
    };

    tracing::debug!(
        connection_id = %metadata.connection_id,
        transport = %metadata.transport,
        peer = %peer,
        "Upgrading to WebSocket"
    );

    let shutdown = state.shutdown.subscribe();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(peer = %peer, error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| {
        handle_session(socket, state.telemetry, state.prefix, metadata, shutdown, connection)
    })
}

/// Serve HTTP on one accepted stream until it closes or is upgraded.
///
/// On shutdown the connection is asked to finish gracefully; upgraded
/// sessions observe shutdown on their own.
pub async fn serve_connection<I>(
    io: I,
    router: Router,
    connection: Arc<ConnectionGuard>,
    peer: SocketAddr,
    mut shutdown: ShutdownSignal,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = connection.id();
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        request.extensions_mut().insert(Arc::clone(&connection));
        router.clone().oneshot(request)
    });

    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %connection_id, peer = %peer, error = %e, "HTTP connection ended with error");
                }
                break;
            }
            _ = shutdown.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
