//! Update dispatch capability supplied by the embedding application.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Error raised by a dispatcher for a single update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dispatch failed for {path}: {message}")]
pub struct DispatchError {
    pub path: String,
    pub message: String,
}

impl DispatchError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Receives updates in the order the server sent them.
///
/// Called synchronously on the connection task, one update at a time.
/// An `Err` is logged and counted; the remaining updates of the batch
/// are still delivered.
pub trait UpdateDispatcher: Send + Sync + 'static {
    fn dispatch(&self, path: &str, message: &Value) -> Result<(), DispatchError>;
}

impl<F> UpdateDispatcher for F
where
    F: Fn(&str, &Value) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    fn dispatch(&self, path: &str, message: &Value) -> Result<(), DispatchError> {
        self(path, message)
    }
}

/// Placeholder dispatcher: logs every update and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl UpdateDispatcher for LoggingDispatcher {
    fn dispatch(&self, path: &str, message: &Value) -> Result<(), DispatchError> {
        info!(path, %message, "update");
        Ok(())
    }
}
