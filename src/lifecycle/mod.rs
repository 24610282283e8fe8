//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Build router → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Close sessions after in-flight message
//!     → Drain connections → Flush telemetry → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, flush
//! - Shutdown has timeout: remaining connections are abandoned after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::Gateway;
