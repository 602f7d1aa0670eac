//! Core data model for the evstream real-time event client.
//!
//! This crate provides the types shared by every layer of the client:
//! - `Message`: the JSON envelope exchanged over the event stream
//! - `ConnectionState`, `ConnectionStatus`: coarse connection lifecycle for UI display
//! - `ConnectionError`: the reason carried by the `error` state

pub mod error;
pub mod message;
pub mod state;

pub use error::{ConnectionError, CoreError, Result};
pub use message::{Message, PING_TYPE, PONG_TYPE, WILDCARD};
pub use state::{ConnectionState, ConnectionStatus};
