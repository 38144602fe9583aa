//! Connection configuration and poll URL construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay before retrying after a failed poll.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Immutable settings for one long-poll connection.
///
/// Deserializes from camelCase JSON with every key optional, so a partial
/// document such as `{"host": "example.com"}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Target host. Empty means the poll URL is relative (`/prefix/token`).
    pub host: String,
    /// Target port. Ignored for relative URLs.
    pub port: u16,
    /// URL scheme, e.g. `http`.
    pub protocol: String,
    /// Path segment placed between `/` and the continuation token.
    pub path_prefix: String,
    /// Intent to relax same-origin restrictions for subdomain deployments.
    /// The loop only reports it; enforcement belongs to the environment.
    pub cross_origin_relax: bool,
    /// Log every constructed poll URL before the request goes out.
    pub debug_logging: bool,
    /// Seed continuation token for the very first poll.
    pub reconnect_with: String,
    /// Backoff delay after a failed poll, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 4020,
            protocol: "http".into(),
            path_prefix: "comet/".into(),
            cross_origin_relax: false,
            debug_logging: false,
            reconnect_with: String::new(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl ConnectionConfig {
    /// Absolute config pointed at `host:port`, otherwise default.
    pub fn for_host(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Build the poll URL for `token`.
    ///
    /// The token is appended verbatim; servers commonly hand out tokens
    /// containing `/` that must reach them unescaped.
    pub fn poll_url(&self, token: &str) -> String {
        if self.is_relative() {
            format!("/{}{}", self.path_prefix, token)
        } else {
            format!(
                "{}://{}:{}/{}{}",
                self.protocol, self.host, self.port, self.path_prefix, token
            )
        }
    }

    pub fn is_relative(&self) -> bool {
        self.host.is_empty()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
