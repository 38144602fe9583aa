//! HTTP/JSON capability the loop polls through.
//!
//! The loop only needs "GET this URL and give me the decoded JSON body".
//! [`ReqwestTransport`] is the native implementation; tests and embedders
//! with their own HTTP stack implement [`PollTransport`] directly.

use std::future::Future;
use std::time::Duration;

use firenze_protocol::PollError;
use reqwest::{Client, Url};
use serde_json::Value;

/// Issues one poll request and decodes its body.
///
/// Non-2xx statuses, transport failures, and undecodable bodies all come
/// back as `Err`. Shape checks on the decoded JSON are left to the loop.
pub trait PollTransport: Send + Sync + 'static {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, PollError>> + Send;
}

/// [`reqwest`]-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<Url>,
}

impl ReqwestTransport {
    /// Transport with default client settings and no request timeout;
    /// long polls are held open by the server for as long as it likes.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: None,
        }
    }

    /// Transport whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, PollError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PollError::transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Resolve relative poll URLs (`/comet/token`) against `base_url`.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    fn resolve(&self, url: &str) -> Result<Url, PollError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base
                    .join(url)
                    .map_err(|e| PollError::transport(format!("invalid poll URL {url}: {e}"))),
                None => Err(PollError::transport(format!(
                    "relative poll URL {url} needs a base URL"
                ))),
            },
            Err(e) => Err(PollError::transport(format!("invalid poll URL {url}: {e}"))),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PollTransport for ReqwestTransport {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, PollError>> + Send {
        let resolved = self.resolve(url);
        let client = self.client.clone();

        async move {
            let url = resolved?;
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| PollError::transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PollError::Status(status.as_u16()));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| PollError::transport(e.to_string()))?;
            serde_json::from_slice(&bytes).map_err(|e| PollError::decode(e.to_string()))
        }
    }
}
