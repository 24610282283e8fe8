//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper connection, Axum router, upgrade handler)
//!     → websocket.rs (per-session echo loop with one span per message)
//!     → Echo sent on the same session
//! ```

pub mod server;
pub mod websocket;

pub use server::{build_router, serve_connection, AppState};
pub use websocket::{ConnectionError, ConnectionHandler, HandshakeMetadata, SessionState};
