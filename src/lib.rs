//! Traced dual-transport WebSocket echo gateway library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod probe;
pub mod telemetry;

pub use config::GatewayConfig;
pub use lifecycle::{Gateway, Shutdown};
pub use telemetry::Telemetry;
