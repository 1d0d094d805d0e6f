//! # cse-hook
//!
//! A client for the private backend API behind a Google Custom Search
//! Engine widget.
//!
//! The widget's API endpoints are discovered once by loading the widget in
//! a recording browser, then queried directly, with every request routed
//! through a rotating pool of public proxies:
//!
//! - Endpoint discovery through any [`BrowserSession`]
//! - Proxy rotation with eviction and wholesale refresh
//! - Lazy pagination: later pages are only fetched when consumed
//! - A distinguished outcome for temporary bans
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cse_hook::{ChromeSession, ChromeSessionConfig, CseConfig, CseHook, SearchOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let browser = Arc::new(ChromeSession::launch(ChromeSessionConfig::default()).await?);
//!     let hook = CseHook::builder(CseConfig::new("https://cse.google.com/cse?cx=000000000000000000000:abcdefghijk"))
//!         .with_browser(browser)
//!         .build()
//!         .await?;
//!
//!     match hook.search("rust programming", false).await? {
//!         SearchOutcome::Banned => eprintln!("temporarily banned"),
//!         SearchOutcome::Pages(mut pages) => {
//!             while let Some(page) = pages.next_page().await? {
//!                 for result in page {
//!                     println!("{}", result.url);
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod config;
mod endpoints;
mod error;
mod query;
mod response;
mod search;

pub mod discovery;
pub mod fetcher;
pub mod fetcher_http;
pub mod proxy;
pub mod uri;

#[cfg(feature = "headless")]
pub mod browser;

pub use config::{CseConfig, DEFAULT_API_PREFIX, DEFAULT_PROXY_LIST_URL, DEFAULT_USER_AGENTS};
pub use discovery::{BrowserSession, EndpointDiscoverer};
pub use endpoints::EndpointPool;
pub use error::{CseError, Result};
pub use fetcher::{Attempt, ResilientFetcher, Transport};
pub use fetcher_http::HttpTransport;
pub use query::{EncodedQuery, Page};
pub use response::{extract_payload, CseResponse, CseResult, Cursor, TEMP_BAN};
pub use search::{CseHook, CseHookBuilder, Pages, SearchOutcome};

#[cfg(feature = "headless")]
pub use browser::{ChromeSession, ChromeSessionConfig};
