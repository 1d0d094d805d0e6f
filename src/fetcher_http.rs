//! HTTP transport using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::fetcher::{Attempt, Transport};
use crate::proxy::{build_client, ProxyConfig};
use crate::Result;

/// A transport that issues plain HTTP requests via reqwest, building one
/// client per attempt so each attempt uses its own proxy.
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport with the given per-attempt timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(8))
    }
}

/// Whether a reqwest error comes from the network rather than from us.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() || err.is_decode()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url, proxy: &ProxyConfig, user_agent: &str) -> Result<Attempt> {
        let client = build_client(proxy, user_agent, self.timeout)?;

        let response = match client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if is_transient(&e) => {
                return Ok(Attempt::TransientFailure {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Ok(Attempt::Response { status, body }),
            Err(e) if is_transient(&e) => Ok(Attempt::TransientFailure {
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
