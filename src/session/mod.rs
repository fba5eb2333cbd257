//! Session Monitoring Module
//!
//! Owns the session lifecycle to the coordination service and the
//! disconnect-retry-then-fatal policy applied to its connection events.

mod monitor;
mod watchdog;

pub use monitor::{ConnectionEvents, SessionMonitor};
pub use watchdog::{Watchdog, DEFAULT_MAX_DISCONNECT_RETRIES};
