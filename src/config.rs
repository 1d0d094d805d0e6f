//! Client configuration with defaults tuned for the public CSE widget.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{CseError, Result};

/// Prefix shared by every internal CSE API request issued by the widget.
pub const DEFAULT_API_PREFIX: &str = "https://cse.google.com/cse/element/";

/// Proxy listing queried for fresh proxies: 100 entries, fastest and most
/// recently checked first.
pub const DEFAULT_PROXY_LIST_URL: &str = "https://proxylist.geonode.com/api/proxy-list?\
     limit=100&page=1&sort_by=lastChecked&sort_type=desc&speed=fast";

/// Realistic browser User-Agent strings, rotated per request.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

/// Configuration for a [`crate::CseHook`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CseConfig {
    /// Public CSE widget URI, e.g. `https://cse.google.com/cse?cx=...`.
    pub cse_uri: String,
    /// Prefix identifying internal API requests in the browser log.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Number of probe queries per discovery round.
    #[serde(default = "default_probe_count")]
    pub probe_count: usize,
    /// Length of each random probe word.
    #[serde(default = "default_word_length")]
    pub word_length: usize,
    /// Failed attempts tolerated before the proxy pool is refetched.
    #[serde(default = "default_max_proxy_retries")]
    pub max_proxy_retries: u32,
    /// Per-attempt HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sleep before each stale-endpoint rediscovery, in seconds.
    #[serde(default = "default_stale_backoff_secs")]
    pub stale_backoff_secs: u64,
    /// Cap on stale-endpoint rediscoveries per search. `None` retries forever.
    #[serde(default)]
    pub max_stale_retries: Option<u32>,
    /// Proxy listing service URL.
    #[serde(default = "default_proxy_list_url")]
    pub proxy_list_url: String,
    /// User agents rotated per request.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_probe_count() -> usize {
    5
}

fn default_word_length() -> usize {
    5
}

fn default_max_proxy_retries() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    8
}

fn default_stale_backoff_secs() -> u64 {
    10
}

fn default_proxy_list_url() -> String {
    DEFAULT_PROXY_LIST_URL.to_string()
}

fn default_user_agents() -> Vec<String> {
    DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
}

impl CseConfig {
    /// Creates a configuration for the given CSE widget URI with defaults
    /// for everything else.
    pub fn new(cse_uri: impl Into<String>) -> Self {
        Self {
            cse_uri: cse_uri.into(),
            api_prefix: default_api_prefix(),
            probe_count: default_probe_count(),
            word_length: default_word_length(),
            max_proxy_retries: default_max_proxy_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            stale_backoff_secs: default_stale_backoff_secs(),
            max_stale_retries: None,
            proxy_list_url: default_proxy_list_url(),
            user_agents: default_user_agents(),
        }
    }

    /// Sets the stale-endpoint rediscovery cap.
    pub fn with_max_stale_retries(mut self, retries: u32) -> Self {
        self.max_stale_retries = Some(retries);
        self
    }

    /// Sets the backoff before each stale-endpoint rediscovery.
    pub fn with_stale_backoff(mut self, secs: u64) -> Self {
        self.stale_backoff_secs = secs;
        self
    }

    /// Sets the proxy retry threshold.
    pub fn with_max_proxy_retries(mut self, retries: u32) -> Self {
        self.max_proxy_retries = retries;
        self
    }

    /// Per-attempt HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff before a stale-endpoint rediscovery.
    pub fn stale_backoff(&self) -> Duration {
        Duration::from_secs(self.stale_backoff_secs)
    }

    /// Parses and checks the CSE widget URI.
    ///
    /// A URI is accepted when its query starts with `cx=` or its host
    /// starts with `cse.google.com`.
    pub fn parsed_cse_uri(&self) -> Result<Url> {
        let uri = Url::parse(&self.cse_uri)
            .map_err(|e| CseError::Config(format!("invalid CSE URI '{}': {}", self.cse_uri, e)))?;

        let has_cx = uri.query().is_some_and(|q| q.starts_with("cx="));
        let is_cse_host = uri
            .host_str()
            .is_some_and(|h| h.starts_with("cse.google.com"));

        if !(has_cx || is_cse_host) {
            return Err(CseError::Config(format!(
                "'{}' is not a Google CSE URI",
                self.cse_uri
            )));
        }
        Ok(uri)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<()> {
        self.parsed_cse_uri()?;
        Url::parse(&self.proxy_list_url)
            .map_err(|e| CseError::Config(format!("invalid proxy list URL: {}", e)))?;

        if self.api_prefix.is_empty() {
            return Err(CseError::Config("api_prefix must not be empty".into()));
        }
        if self.probe_count == 0 {
            return Err(CseError::Config("probe_count must be greater than 0".into()));
        }
        if self.word_length == 0 {
            return Err(CseError::Config("word_length must be greater than 0".into()));
        }
        if self.max_proxy_retries == 0 {
            return Err(CseError::Config(
                "max_proxy_retries must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CseError::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.user_agents.is_empty() {
            return Err(CseError::Config("at least one user agent is required".into()));
        }
        Ok(())
    }
}
