//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to a configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::ListenerStartupError;

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerStartupError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerStartupError::InvalidAddress(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerStartupError::Bind { addr, source })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerStartupError::Bind { addr, source })?;

        tracing::info!(
            listener = %config.name,
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "connection limit closed"))?;

        // Then accept the connection
        let (stream, addr) = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, permit))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_rejects_invalid_address() {
        let config = ListenerConfig::plain("bad", "nowhere");
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerStartupError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn bind_reports_port_in_use() {
        let first = Listener::bind(&ListenerConfig::plain("a", "127.0.0.1:0")).await.unwrap();
        let taken = first.local_addr().unwrap().to_string();
        assert!(matches!(
            Listener::bind(&ListenerConfig::plain("b", taken)).await,
            Err(ListenerStartupError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn accepted_connection_holds_a_permit() {
        let config = ListenerConfig {
            max_connections: 2,
            ..ListenerConfig::plain("limited", "127.0.0.1:0")
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        assert_eq!(listener.max_connections(), 2);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }
}
