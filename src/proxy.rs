//! Rotating proxy pool backed by a public proxy listing.
//!
//! Every fetch attempt goes out through a proxy picked at random from the
//! pool. Proxies that fail are evicted one by one; the whole pool is
//! refetched from its [`ProxyProvider`] when it runs dry or when too many
//! attempts have failed in a row.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CseError, Result};

/// Proxy protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyProtocol {
    /// HTTP proxy
    #[default]
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

impl ProxyProtocol {
    /// Parses a protocol name as reported by proxy listings.
    ///
    /// Returns `None` for protocols the HTTP client cannot route through.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }

    /// URL scheme for this protocol.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

/// A single proxy descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    /// Proxy host (IP or domain)
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Proxy protocol
    pub protocol: ProxyProtocol,
}

impl ProxyConfig {
    /// Creates a new HTTP proxy descriptor.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProxyProtocol::Http,
        }
    }

    /// Sets the proxy protocol.
    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Returns the proxy URL string.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

/// Source of fresh proxy lists.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Fetches a list of available proxies.
    async fn fetch_proxies(&self) -> Result<Vec<ProxyConfig>>;
}

/// A static proxy provider that returns a fixed list of proxies.
pub struct StaticProxyProvider {
    proxies: Vec<ProxyConfig>,
}

impl StaticProxyProvider {
    /// Creates a new static proxy provider.
    pub fn new(proxies: Vec<ProxyConfig>) -> Self {
        Self { proxies }
    }
}

#[async_trait]
impl ProxyProvider for StaticProxyProvider {
    async fn fetch_proxies(&self) -> Result<Vec<ProxyConfig>> {
        Ok(self.proxies.clone())
    }
}

/// Provider backed by the geonode proxy listing API.
pub struct GeonodeProvider {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<ListingEntry>,
}

#[derive(Deserialize)]
struct ListingEntry {
    #[serde(default)]
    protocols: Vec<String>,
    ip: String,
    port: ListingPort,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingPort {
    Number(u16),
    Text(String),
}

impl GeonodeProvider {
    /// Creates a provider querying `url` with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(url, client))
    }

    /// Creates a provider with a custom reqwest client.
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProxyProvider for GeonodeProvider {
    async fn fetch_proxies(&self) -> Result<Vec<ProxyConfig>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CseError::ProxyList(e.to_string()))?
            .text()
            .await
            .map_err(|e| CseError::ProxyList(e.to_string()))?;

        parse_listing(&body)
    }
}

/// Decodes a proxy listing body into descriptors.
///
/// Only the first protocol of each entry is used. Entries with an
/// unsupported protocol or an unreadable port are skipped.
pub fn parse_listing(body: &str) -> Result<Vec<ProxyConfig>> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| CseError::ProxyList(format!("undecodable listing: {}", e)))?;

    let proxies = listing
        .data
        .into_iter()
        .filter_map(|entry| {
            let protocol = entry.protocols.first().and_then(|p| ProxyProtocol::parse(p));
            let port = match entry.port {
                ListingPort::Number(port) => Some(port),
                ListingPort::Text(port) => port.trim().parse().ok(),
            };
            match (protocol, port) {
                (Some(protocol), Some(port)) => {
                    Some(ProxyConfig::new(entry.ip, port).with_protocol(protocol))
                }
                _ => {
                    debug!("Skipping unusable listing entry {} {:?}", entry.ip, entry.protocols);
                    None
                }
            }
        })
        .collect();

    Ok(proxies)
}

struct PoolState {
    proxies: Vec<ProxyConfig>,
    generation: u64,
}

/// A proxy pool with random selection and wholesale refresh.
///
/// A refresh swaps the whole list under the write lock and bumps the
/// generation, so readers see either the old list or the new one.
pub struct ProxyPool {
    state: RwLock<PoolState>,
    provider: Arc<dyn ProxyProvider>,
    rng: Mutex<StdRng>,
}

impl ProxyPool {
    /// Creates an empty pool fed by `provider`, seeded from OS entropy.
    pub fn new(provider: Arc<dyn ProxyProvider>) -> Self {
        Self::with_rng(provider, StdRng::from_entropy())
    }

    /// Creates an empty pool with an explicit random source.
    pub fn with_rng(provider: Arc<dyn ProxyProvider>, rng: StdRng) -> Self {
        Self {
            state: RwLock::new(PoolState {
                proxies: Vec::new(),
                generation: 0,
            }),
            provider,
            rng: Mutex::new(rng),
        }
    }

    /// Replaces the pool with a fresh list from the provider.
    ///
    /// Returns the new pool size. Provider failures propagate; the old list
    /// stays in place in that case.
    pub async fn refresh(&self) -> Result<usize> {
        let fresh = self.provider.fetch_proxies().await?;
        let mut state = self.state.write().await;
        state.proxies = fresh;
        state.generation += 1;
        debug!(
            "Refreshed proxy pool with {} proxies (generation {})",
            state.proxies.len(),
            state.generation
        );
        Ok(state.proxies.len())
    }

    /// Picks a proxy uniformly at random, or `None` if the pool is empty.
    pub async fn pick(&self) -> Option<ProxyConfig> {
        let state = self.state.read().await;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        state.proxies.choose(&mut *rng).cloned()
    }

    /// Removes a proxy from the pool. Returns whether it was present.
    pub async fn evict(&self, proxy: &ProxyConfig) -> bool {
        let mut state = self.state.write().await;
        let before = state.proxies.len();
        state.proxies.retain(|p| p != proxy);
        before != state.proxies.len()
    }

    /// Returns the number of proxies in the pool.
    pub async fn len(&self) -> usize {
        self.state.read().await.proxies.len()
    }

    /// Returns whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.proxies.is_empty()
    }

    /// Number of refreshes performed so far.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Returns a copy of the current proxies.
    pub async fn snapshot(&self) -> Vec<ProxyConfig> {
        self.state.read().await.proxies.clone()
    }
}

/// Creates a reqwest client that routes every scheme through `proxy`.
pub fn build_client(proxy: &ProxyConfig, user_agent: &str, timeout: Duration) -> Result<Client> {
    let proxy = ReqwestProxy::all(proxy.url())?;
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .proxy(proxy)
        .build()?;
    Ok(client)
}
