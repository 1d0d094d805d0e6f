//! Proxy-rotating fetcher for CSE API pages.
//!
//! [`ResilientFetcher`] keeps retrying through fresh proxies until the
//! backend answers with a 2xx or a 403. Bad proxies are expected: they are
//! evicted and never surface as errors.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};
use url::Url;

use crate::proxy::{ProxyConfig, ProxyPool};
use crate::response::{extract_payload, CseResponse};
use crate::uri::compose;
use crate::{CseError, EncodedQuery, Page, Result};

/// Outcome of a single GET attempt through one proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The target answered, whatever the status.
    Response {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Connect, timeout, TLS or body transfer failure.
    TransientFailure {
        /// Human-readable cause.
        reason: String,
    },
}

/// Issues one GET through one proxy.
///
/// Transport-level failures are reported as [`Attempt::TransientFailure`];
/// an `Err` is reserved for problems retrying cannot fix.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches `url` through `proxy` with the given user agent.
    async fn get(&self, url: &Url, proxy: &ProxyConfig, user_agent: &str) -> Result<Attempt>;
}

/// Fetches CSE API pages, rotating proxies and user agents per attempt.
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    proxies: Arc<ProxyPool>,
    user_agents: Vec<String>,
    max_retries: u32,
    rng: Mutex<StdRng>,
}

impl ResilientFetcher {
    /// Creates a fetcher.
    ///
    /// After more than `max_retries` consecutive failed attempts the proxy
    /// pool is refetched wholesale.
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Arc<ProxyPool>,
        user_agents: Vec<String>,
        max_retries: u32,
        rng: StdRng,
    ) -> Self {
        Self {
            transport,
            proxies,
            user_agents,
            max_retries,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the proxy pool this fetcher draws from.
    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    fn pick_user_agent(&self) -> Result<String> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.user_agents
            .choose(&mut *rng)
            .cloned()
            .ok_or_else(|| CseError::Config("at least one user agent is required".into()))
    }

    async fn pick_proxy(&self) -> Result<ProxyConfig> {
        if let Some(proxy) = self.proxies.pick().await {
            return Ok(proxy);
        }
        debug!("Proxy pool empty, refreshing");
        self.proxies.refresh().await?;
        self.proxies.pick().await.ok_or(CseError::ProxyPoolExhausted)
    }

    async fn drop_proxy(&self, proxy: &ProxyConfig, reason: &str, failures: &mut u32) -> Result<()> {
        warn!("Evicting proxy {}: {}", proxy.url(), reason);
        self.proxies.evict(proxy).await;
        *failures += 1;
        if *failures > self.max_retries {
            debug!("{} failed attempts, refetching proxy pool", failures);
            self.proxies.refresh().await?;
            *failures = 0;
        }
        Ok(())
    }

    /// Fetches one page of results for `query` from `endpoint`.
    ///
    /// An HTTP 403 yields [`CseResponse::temp_ban`]. Other non-2xx statuses
    /// come from the proxy, not the backend, and count as a failed attempt.
    /// A 2xx body must carry the callback payload, otherwise a parse error
    /// is returned.
    pub async fn fetch(&self, endpoint: &Url, query: &EncodedQuery, page: Page) -> Result<CseResponse> {
        let target = compose(endpoint, query, page);
        let mut failures: u32 = 0;

        let body = loop {
            let user_agent = self.pick_user_agent()?;
            let proxy = self.pick_proxy().await?;

            match self.transport.get(&target, &proxy, &user_agent).await? {
                Attempt::Response { status: 403, .. } => {
                    warn!("Endpoint refused page {} with 403", page);
                    return Ok(CseResponse::temp_ban());
                }
                Attempt::Response { status, body } if (200..300).contains(&status) => {
                    debug!("Page {} answered {} via {}", page, status, proxy.url());
                    break body;
                }
                Attempt::Response { status, .. } => {
                    let reason = format!("HTTP {}", status);
                    self.drop_proxy(&proxy, &reason, &mut failures).await?;
                }
                Attempt::TransientFailure { reason } => {
                    self.drop_proxy(&proxy, &reason, &mut failures).await?;
                }
            }
        };

        extract_payload(&body)
    }
}
