//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → tls.rs (optional TLS handshake material and client cert policy)
//!     → connection.rs (identity, lifetime tracking)
//!     → manager.rs (one accept loop per listener, hand off to HTTP layer)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Plain and TLS listeners share every step except the handshake

pub mod connection;
pub mod listener;
pub mod manager;
pub mod tls;

use std::net::SocketAddr;

use thiserror::Error;

pub use manager::{ListenerFailure, ListenerInfo, ListenerManager, StartupError};

/// Reasons a single listener cannot start.
#[derive(Debug, Error)]
pub enum ListenerStartupError {
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS listener has no certificate and key configured")]
    MissingTlsMaterial,

    #[error("failed to read TLS material from {path}: {source}")]
    TlsMaterial {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no {kind} found in {path}")]
    EmptyTlsMaterial { kind: &'static str, path: String },

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid client certificate policy: {0}")]
    ClientVerifier(String),
}
