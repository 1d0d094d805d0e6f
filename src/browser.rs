//! Headless Chrome session recording outbound requests.
//!
//! This module is only available when the `headless` Cargo feature is enabled.
//! It drives Chrome/Chromium via the Chrome DevTools Protocol and records the
//! URL of every `Network.requestWillBeSent` event of its single tab, which is
//! what endpoint discovery needs.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::discovery::BrowserSession;
use crate::{CseError, Result};

/// Hosts that always bypass the browser proxy.
const PROXY_BYPASS: &str = "localhost;127.0.0.1";

/// Well-known command names to search in PATH.
const KNOWN_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Configuration for a [`ChromeSession`].
#[derive(Debug, Clone)]
pub struct ChromeSessionConfig {
    /// Whether to run the browser in headless mode.
    pub headless: bool,
    /// Path to the Chrome/Chromium executable. If `None`, auto-detected.
    pub chrome_path: Option<PathBuf>,
    /// Outbound proxy, `host:port` or a URL. Applied to every scheme.
    pub proxy: Option<String>,
    /// Time to let network activity settle after the load event.
    pub settle: Duration,
}

impl Default for ChromeSessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            proxy: None,
            settle: Duration::from_millis(1500),
        }
    }
}

/// Locates a Chrome/Chromium executable via the `CHROME` environment
/// variable or well-known command names in PATH.
pub fn detect_chrome() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    KNOWN_COMMANDS.iter().find_map(|cmd| which::which(cmd).ok())
}

/// Turns a proxy setting into Chrome's `--proxy-server` value (`host:port`).
pub fn proxy_server(proxy: &str) -> Result<String> {
    let with_scheme = if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| CseError::Config(format!("invalid browser proxy '{}': {}", proxy, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| CseError::Config(format!("browser proxy '{}' has no host", proxy)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// A single-tab Chrome session implementing [`BrowserSession`].
pub struct ChromeSession {
    browser: Mutex<Browser>,
    page: Page,
    recorded: Arc<StdMutex<Vec<String>>>,
    settle: Duration,
    handler: JoinHandle<()>,
    recorder: JoinHandle<()>,
}

impl ChromeSession {
    /// Launches the browser and opens the recording tab.
    pub async fn launch(config: ChromeSessionConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();

        if !config.headless {
            builder = builder.with_head();
        }

        match config.chrome_path.clone().or_else(detect_chrome) {
            Some(path) => {
                debug!("Using Chrome at: {}", path.display());
                builder = builder.chrome_executable(path);
            }
            None => debug!("No Chrome found, relying on chromiumoxide defaults"),
        }

        // Hide navigator.webdriver and automation indicators
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run");

        if let Some(ref proxy) = config.proxy {
            builder = builder
                .arg(format!("--proxy-server={}", proxy_server(proxy)?))
                .arg(format!("--proxy-bypass-list={}", PROXY_BYPASS));
        }

        let browser_config = builder
            .build()
            .map_err(|e| CseError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CseError::Browser(format!("Failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {}", e);
                }
            }
            debug!("Browser CDP handler exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CseError::Browser(format!("Failed to open tab: {}", e)))?;

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| CseError::Browser(format!("Failed to subscribe to requests: {}", e)))?;

        let recorded = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&recorded);
        let recorder = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                log.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(event.request.url.clone());
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            recorded,
            settle: config.settle,
            handler,
            recorder,
        })
    }

    /// Closes the browser process.
    pub async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| CseError::Browser(format!("Failed to close browser: {}", e)))?;
        if let Err(e) = browser.wait().await {
            warn!("Browser did not exit cleanly: {}", e);
        }
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.recorder.abort();
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| CseError::Browser(format!("Navigation to {} failed: {}", url, e)))?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    fn recorded_requests(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear_requests(&self) {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
