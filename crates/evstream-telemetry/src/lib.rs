//! Prometheus metrics and structured logging for evstream.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for connection state, reconnects and dispatched messages

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
