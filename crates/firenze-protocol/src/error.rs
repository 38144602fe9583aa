//! Poll failure taxonomy.
//!
//! Every variant is recoverable: the loop answers all of them with a
//! delayed retry. Nothing here is ever surfaced as a terminal failure.

use thiserror::Error;

/// Why a completed poll did not yield a usable [`PollResponse`](crate::PollResponse).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Connection refused, timeout, bad URL, or any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The body was empty or not valid JSON.
    #[error("invalid JSON body: {0}")]
    Decode(String),

    /// The body was JSON but not a poll response.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PollError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// True for failures that happened before a body could be interpreted.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status(_))
    }
}

/// Shape violations in an otherwise decodable body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The body decoded to JSON `null`.
    #[error("response body is absent")]
    AbsentBody,

    /// The body decoded to something other than a JSON object.
    #[error("response body is not an object")]
    NotAnObject,

    /// The object has no `updates` array (or it is `null`).
    #[error("response has no updates")]
    MissingUpdates,

    /// `updates` exists but the object does not match the poll response shape.
    #[error("malformed poll response: {0}")]
    Malformed(String),
}
