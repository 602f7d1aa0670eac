//! Command-line event-stream client.
//!
//! Wires an [`evstream_ws::EventStreamClient`] from a TOML configuration:
//! - Credential read from an environment variable on every connect attempt
//! - Configured event-type subscriptions, logged as they arrive
//! - Connection state and message counts exported as Prometheus metrics
//! - Graceful disconnect on shutdown

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
