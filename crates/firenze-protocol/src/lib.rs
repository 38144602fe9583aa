//! Firenze - Protocol Types
//!
//! Wire types for the Firenze long-poll stream, the connection
//! configuration that addresses it, and the errors a poll can end in.
//! Nothing in here performs I/O; the client crate drives the loop.

pub mod config;
pub mod error;
pub mod wire;

pub use config::{ConnectionConfig, DEFAULT_RETRY_DELAY_MS};
pub use error::{PollError, ProtocolError};
pub use wire::{PollResponse, Update};
