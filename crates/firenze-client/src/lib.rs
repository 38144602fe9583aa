//! Firenze Client
//!
//! A long-polling ("comet") client loop. Each [`Connection`] keeps exactly
//! one poll request (or one retry timer) alive at a time:
//! - [`RequestScheduler`] builds the poll URL and sends the request
//! - [`ResponseHandler`] advances the continuation token, dispatches
//!   updates in order, and immediately polls again
//! - [`BackoffTimer`] retries after a fixed delay when a poll fails
//!
//! The HTTP stack and the consumer of updates are injected through the
//! [`PollTransport`] and [`UpdateDispatcher`] traits.

pub mod backoff;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod scheduler;
pub mod state;
pub mod transport;

pub use backoff::{BackoffTimer, TimerHandle};
pub use connection::{Connection, ConnectionHandle};
pub use dispatch::{DispatchError, LoggingDispatcher, UpdateDispatcher};
pub use handler::{HandleOutcome, ResponseHandler};
pub use scheduler::RequestScheduler;
pub use state::{ConnectionState, ConnectionStatus, LoopPhase, LoopStats};
pub use transport::{PollTransport, ReqwestTransport};

pub use firenze_protocol::{ConnectionConfig, PollError, PollResponse, ProtocolError, Update};
