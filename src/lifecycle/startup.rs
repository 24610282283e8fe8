//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared router from validated configuration and telemetry
//! - Start listeners under the configured startup policy
//! - Run until shutdown, drain connections, then flush telemetry
//!
//! # Design Decisions
//! - Configuration is loaded and validated by the caller
//! - Listeners start last (traffic only when ready)
//! - Telemetry is flushed only after the drain has finished or timed out

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::http::{build_router, AppState};
use crate::lifecycle::Shutdown;
use crate::net::{ListenerFailure, ListenerInfo, ListenerManager, StartupError};
use crate::telemetry::Telemetry;

/// A started gateway: listeners accepting, waiting for shutdown.
pub struct Gateway {
    manager: ListenerManager,
    telemetry: Arc<Telemetry>,
    shutdown: Shutdown,
    drain_timeout: Duration,
}

impl Gateway {
    /// Start all configured listeners.
    ///
    /// Returns once every listener that will run is accepting connections.
    pub async fn start(
        config: &GatewayConfig,
        telemetry: Arc<Telemetry>,
        shutdown: Shutdown,
    ) -> Result<Self, StartupError> {
        let state = AppState {
            telemetry: Arc::clone(&telemetry),
            prefix: Arc::from(config.echo.prefix.as_str()),
            shutdown: shutdown.clone(),
        };
        let router = build_router(state);

        let mut manager = ListenerManager::new(router, shutdown.clone());
        manager
            .start_all(&config.listeners, config.lifecycle.startup_policy)
            .await?;

        for failure in manager.failures() {
            tracing::warn!(
                listener = %failure.name,
                error = %failure.error,
                "Listener skipped; remaining listeners keep serving"
            );
        }

        tracing::info!(
            listeners = manager.listeners().len(),
            startup_policy = ?config.lifecycle.startup_policy,
            "Gateway started"
        );

        Ok(Self {
            manager,
            telemetry,
            shutdown,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        })
    }

    pub fn listeners(&self) -> &[ListenerInfo] {
        self.manager.listeners()
    }

    pub fn failures(&self) -> &[ListenerFailure] {
        self.manager.failures()
    }

    /// Bound address of the named listener, if it is running.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.manager.local_addr(name)
    }

    pub fn active_connections(&self) -> u64 {
        self.manager.tracker().active_count()
    }

    /// Handle that stops the gateway when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve until shutdown is triggered.
    ///
    /// Returns `true` if every connection closed within the drain timeout.
    pub async fn run(self) -> bool {
        let drained = self.manager.run_until_shutdown(self.drain_timeout).await;
        self.telemetry.shutdown();
        tracing::info!(drained, "Shutdown complete");
        drained
    }
}
