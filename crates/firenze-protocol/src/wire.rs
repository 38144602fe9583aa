//! Poll response body.
//!
//! ```json
//! { "reconnectWith": "uid/3", "updates": [ { "path": "/foo", "message": "m1" } ] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One server-pushed update. `message` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: String,
    #[serde(default)]
    pub message: Value,
}

impl Update {
    pub fn new(path: impl Into<String>, message: Value) -> Self {
        Self {
            path: path.into(),
            message,
        }
    }
}

/// A decoded poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Continuation token to send on the next poll.
    #[serde(rename = "reconnectWith", default)]
    pub reconnect_with: String,
    /// Updates in delivery order. May be empty.
    pub updates: Vec<Update>,
}

impl PollResponse {
    pub fn new(reconnect_with: impl Into<String>, updates: Vec<Update>) -> Self {
        Self {
            reconnect_with: reconnect_with.into(),
            updates,
        }
    }

    /// Interpret a decoded JSON body.
    ///
    /// A body without an `updates` array is rejected the same way a
    /// garbage body is: the loop cannot tell "nothing to say" from
    /// "broken server", and both get the retry path.
    pub fn from_body(body: Value) -> Result<Self, ProtocolError> {
        let object = match &body {
            Value::Null => return Err(ProtocolError::AbsentBody),
            Value::Object(object) => object,
            _ => return Err(ProtocolError::NotAnObject),
        };

        match object.get("updates") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingUpdates),
            Some(_) => {}
        }

        serde_json::from_value(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// The string `reconnectWith` of an object body, whether or not the
    /// rest of the body is usable.
    pub fn carried_token(body: &Value) -> Option<&str> {
        body.as_object()?.get("reconnectWith")?.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}
