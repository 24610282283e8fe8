//! Listener management.
//!
//! # Responsibilities
//! - Bind every configured listener and prepare its TLS acceptor
//! - Apply the startup policy when some listeners fail
//! - Run one accept loop per listener and hand connections to the HTTP layer
//! - Stop accepting and drain open connections on shutdown
//!
//! # Startup Policy
//! - `independent`: a failed listener is reported and skipped; startup only
//!   fails when no listener is left
//! - `all_required`: the first failure aborts startup before any accept
//!   loop runs

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::config::{ListenerConfig, StartupPolicy, TransportKind};
use crate::http::serve_connection;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::net::tls;
use crate::net::ListenerStartupError;

/// A listener that failed to start.
#[derive(Debug)]
pub struct ListenerFailure {
    pub name: String,
    pub error: ListenerStartupError,
}

/// Gateway-level startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("listener '{name}' failed to start: {source}")]
    Listener {
        name: String,
        #[source]
        source: ListenerStartupError,
    },

    #[error("no listener could be started ({} failed)", .0.len())]
    NoListeners(Vec<ListenerFailure>),
}

/// A running listener.
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    pub name: String,
    pub transport: TransportKind,
    pub local_addr: SocketAddr,
}

/// Owns the accept loops of all listeners.
pub struct ListenerManager {
    router: Router,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    accept_loops: JoinSet<()>,
    listeners: Vec<ListenerInfo>,
    failures: Vec<ListenerFailure>,
}

impl ListenerManager {
    pub fn new(router: Router, shutdown: Shutdown) -> Self {
        Self {
            router,
            shutdown,
            tracker: ConnectionTracker::new(),
            accept_loops: JoinSet::new(),
            listeners: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Start every listener according to `policy`.
    pub async fn start_all(
        &mut self,
        configs: &[ListenerConfig],
        policy: StartupPolicy,
    ) -> Result<(), StartupError> {
        let mut prepared = Vec::with_capacity(configs.len());
        for config in configs {
            match prepare(config).await {
                Ok(ready) => prepared.push(ready),
                Err(error) => {
                    tracing::error!(listener = %config.name, error = %error, "Listener failed to start");
                    if policy == StartupPolicy::AllRequired {
                        return Err(StartupError::Listener {
                            name: config.name.clone(),
                            source: error,
                        });
                    }
                    self.failures.push(ListenerFailure {
                        name: config.name.clone(),
                        error,
                    });
                }
            }
        }

        if prepared.is_empty() {
            return Err(StartupError::NoListeners(std::mem::take(&mut self.failures)));
        }

        for ready in prepared {
            self.spawn(ready);
        }
        Ok(())
    }

    fn spawn(&mut self, ready: PreparedListener) {
        let info = ready.info.clone();
        tracing::info!(
            listener = %info.name,
            transport = %info.transport,
            address = %info.local_addr,
            "Accepting WebSocket connections"
        );
        self.listeners.push(info);
        self.accept_loops.spawn(accept_loop(
            ready,
            self.router.clone(),
            self.tracker.clone(),
            self.shutdown.clone(),
        ));
    }

    pub fn listeners(&self) -> &[ListenerInfo] {
        &self.listeners
    }

    /// Bound address of a running listener.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.local_addr)
    }

    pub fn failures(&self) -> &[ListenerFailure] {
        &self.failures
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Wait for the shutdown trigger, stop all accept loops and wait up to
    /// `drain_timeout` for open connections. Returns `true` if fully drained.
    pub async fn run_until_shutdown(mut self, drain_timeout: Duration) -> bool {
        self.shutdown.subscribe().recv().await;

        while let Some(result) = self.accept_loops.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Accept loop terminated abnormally");
            }
        }

        let open = self.tracker.active_count();
        tracing::info!(open_connections = open, "Listeners stopped, draining connections");

        let drained = self.tracker.wait_for_drain(drain_timeout).await;
        if !drained {
            tracing::warn!(
                open_connections = self.tracker.active_count(),
                timeout_secs = drain_timeout.as_secs(),
                "Drain timeout elapsed with open connections"
            );
        }
        drained
    }
}

struct PreparedListener {
    info: ListenerInfo,
    listener: Listener,
    acceptor: Option<TlsAcceptor>,
}

async fn prepare(config: &ListenerConfig) -> Result<PreparedListener, ListenerStartupError> {
    let acceptor = match config.kind {
        TransportKind::Plain => None,
        TransportKind::Tls => {
            let material = config
                .tls
                .as_ref()
                .ok_or(ListenerStartupError::MissingTlsMaterial)?;
            if material.request_client_cert && !material.verify_client_cert {
                tracing::warn!(
                    listener = %config.name,
                    "Client certificates are requested but NOT verified; this relaxed mode is meant for testing only"
                );
            }
            Some(TlsAcceptor::from(tls::build_server_config(material)?))
        }
    };

    let listener = Listener::bind(config).await?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenerStartupError::Bind {
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            source,
        })?;

    Ok(PreparedListener {
        info: ListenerInfo {
            name: config.name.clone(),
            transport: config.kind,
            local_addr,
        },
        listener,
        acceptor,
    })
}

async fn accept_loop(
    ready: PreparedListener,
    router: Router,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
) {
    let PreparedListener {
        info,
        listener,
        acceptor,
    } = ready;
    let mut stop = shutdown.subscribe();

    loop {
        let accepted = tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(listener = %info.name, error = %e, "Failed to accept connection");
                // Back off on resource exhaustion (e.g. EMFILE).
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let connection = Arc::new(tracker.track(info.transport, Some(permit)));
        let router = router.clone();
        let acceptor = acceptor.clone();
        let mut conn_shutdown = shutdown.subscribe();
        let listener_name = info.name.clone();

        tokio::spawn(async move {
            match acceptor {
                None => serve_connection(stream, router, connection, peer, conn_shutdown).await,
                Some(acceptor) => {
                    let handshake = tokio::select! {
                        result = acceptor.accept(stream) => result,
                        _ = conn_shutdown.recv() => return,
                    };
                    match handshake {
                        Ok(tls_stream) => {
                            serve_connection(tls_stream, router, connection, peer, conn_shutdown).await
                        }
                        Err(e) => tracing::warn!(
                            listener = %listener_name,
                            connection_id = %connection.id(),
                            peer = %peer,
                            error = %e,
                            "TLS handshake failed"
                        ),
                    }
                }
            }
        });
    }

    tracing::info!(listener = %info.name, "Listener stopped accepting");
}
