//! Search orchestration and lazy pagination.

use std::sync::Arc;

use futures::stream::{self, Stream};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};
use url::Url;

use crate::discovery::{BrowserSession, EndpointDiscoverer};
use crate::endpoints::EndpointPool;
use crate::fetcher::{ResilientFetcher, Transport};
use crate::fetcher_http::HttpTransport;
use crate::proxy::{GeonodeProvider, ProxyPool, ProxyProvider};
use crate::{CseConfig, CseError, CseResponse, CseResult, EncodedQuery, Page, Result};

/// Client for one CSE configuration: discovers its internal API once and
/// queries it many times through rotating proxies.
pub struct CseHook {
    config: CseConfig,
    cse_uri: Url,
    discoverer: EndpointDiscoverer,
    fetcher: ResilientFetcher,
    endpoints: EndpointPool,
}

/// Builder for [`CseHook`].
pub struct CseHookBuilder {
    config: CseConfig,
    browser: Option<Arc<dyn BrowserSession>>,
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn ProxyProvider>>,
    endpoints: Vec<Url>,
    seed: Option<u64>,
}

impl CseHookBuilder {
    /// Sets the browser used for endpoint discovery. Required.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserSession>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Replaces the default reqwest transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default geonode proxy listing.
    pub fn with_proxy_provider(mut self, provider: Arc<dyn ProxyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Pre-seeds the endpoint pool, skipping the first discovery round.
    pub fn with_endpoints(mut self, endpoints: Vec<Url>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Seeds every random choice the client makes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }

    /// Validates the configuration and fetches the initial proxy list.
    pub async fn build(self) -> Result<CseHook> {
        self.config.validate()?;
        let cse_uri = self.config.parsed_cse_uri()?;

        let browser = self
            .browser
            .clone()
            .ok_or_else(|| CseError::Config("a browser session is required".into()))?;
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.request_timeout())),
        };
        let provider = match self.provider.clone() {
            Some(provider) => provider,
            None => Arc::new(GeonodeProvider::new(
                self.config.proxy_list_url.clone(),
                self.config.request_timeout(),
            )?),
        };

        let proxies = Arc::new(ProxyPool::with_rng(provider, self.rng(0)));
        proxies.refresh().await?;

        let endpoints = EndpointPool::new(self.rng(1));
        if !self.endpoints.is_empty() {
            endpoints.replace(self.endpoints.clone()).await;
        }

        let discoverer =
            EndpointDiscoverer::new(browser, self.config.api_prefix.clone(), self.rng(2));
        let fetcher = ResilientFetcher::new(
            transport,
            proxies,
            self.config.user_agents.clone(),
            self.config.max_proxy_retries,
            self.rng(3),
        );

        Ok(CseHook {
            config: self.config,
            cse_uri,
            discoverer,
            fetcher,
            endpoints,
        })
    }
}

/// Outcome of [`CseHook::search`].
pub enum SearchOutcome<'a> {
    /// The backend refused traffic with HTTP 403. Stop searching for now.
    Banned,
    /// Result pages, fetched as they are consumed.
    Pages(Pages<'a>),
}

impl<'a> SearchOutcome<'a> {
    /// Whether the search hit a temporary ban.
    pub fn is_banned(&self) -> bool {
        matches!(self, Self::Banned)
    }

    /// Returns the pages, or `None` if banned.
    pub fn into_pages(self) -> Option<Pages<'a>> {
        match self {
            Self::Banned => None,
            Self::Pages(pages) => Some(pages),
        }
    }
}

impl CseHook {
    /// Starts building a client for `config`.
    pub fn builder(config: CseConfig) -> CseHookBuilder {
        CseHookBuilder {
            config,
            browser: None,
            transport: None,
            provider: None,
            endpoints: Vec::new(),
            seed: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CseConfig {
        &self.config
    }

    /// Returns the proxy pool.
    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        self.fetcher.proxy_pool()
    }

    /// Number of cached endpoints.
    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.len().await
    }

    /// Runs a discovery round and replaces the endpoint pool with its result.
    pub async fn renew_endpoints(&self) -> Result<usize> {
        let discovered = self
            .discoverer
            .discover(&self.cse_uri, self.config.probe_count, self.config.word_length)
            .await?;
        let count = discovered.len();
        let generation = self.endpoints.replace(discovered).await;
        debug!("Endpoint pool renewed with {} endpoints (generation {})", count, generation);
        Ok(count)
    }

    async fn fetch_page(&self, query: &EncodedQuery, page: Page) -> Result<CseResponse> {
        let endpoint = match self.endpoints.choose().await {
            Some(endpoint) => endpoint,
            None => {
                self.renew_endpoints().await?;
                self.endpoints
                    .choose()
                    .await
                    .ok_or_else(|| CseError::Config("discovery produced no endpoints".into()))?
            }
        };
        self.fetcher.fetch(&endpoint, query, page).await
    }

    /// Searches for a raw query term.
    ///
    /// Only the first page is fetched here; later pages are fetched by
    /// [`Pages::next_page`].
    pub async fn search(&self, query: &str, renew_endpoints: bool) -> Result<SearchOutcome<'_>> {
        self.search_encoded(EncodedQuery::new(query)?, renew_endpoints)
            .await
    }

    /// Searches for an already encoded query.
    pub async fn search_encoded(
        &self,
        query: EncodedQuery,
        renew_endpoints: bool,
    ) -> Result<SearchOutcome<'_>> {
        if renew_endpoints || self.endpoints.is_empty().await {
            self.renew_endpoints().await?;
        }

        let mut stale_rounds: u32 = 0;
        let first = loop {
            let response = self.fetch_page(&query, Page::FIRST).await?;
            if response.is_temp_ban() {
                warn!("Temporarily banned while searching '{}'", query);
                return Ok(SearchOutcome::Banned);
            }
            if !response.has_error() {
                break response;
            }

            if let Some(max) = self.config.max_stale_retries {
                if stale_rounds >= max {
                    return Err(CseError::StaleEndpoints {
                        attempts: stale_rounds,
                    });
                }
            }
            stale_rounds += 1;
            warn!(
                "Endpoint error {:?}, rediscovering in {:?} (round {})",
                response.error,
                self.config.stale_backoff(),
                stale_rounds
            );
            tokio::time::sleep(self.config.stale_backoff()).await;
            self.renew_endpoints().await?;
        };

        let advertised = first.page_count();
        let last = Page::new(advertised.min(Page::LAST.number() as usize) as u32).ok();
        let next = match last {
            Some(last) if last > Page::FIRST => Page::FIRST.next(),
            _ => None,
        };
        debug!("'{}' advertises {} pages", query, advertised);

        Ok(SearchOutcome::Pages(Pages {
            hook: self,
            query,
            first: Some(first.results),
            next,
            last: last.unwrap_or(Page::FIRST),
        }))
    }
}

/// Lazily fetched result pages of one search.
///
/// Nothing past the first page is requested until [`Pages::next_page`]
/// asks for it. Dropping the value issues no further requests.
pub struct Pages<'a> {
    hook: &'a CseHook,
    query: EncodedQuery,
    first: Option<Vec<CseResult>>,
    next: Option<Page>,
    last: Page,
}

impl<'a> Pages<'a> {
    /// The query these pages belong to.
    pub fn query(&self) -> &EncodedQuery {
        &self.query
    }

    /// Returns the next non-empty page, or `None` once every advertised
    /// page has been tried. The first page is returned even when empty.
    ///
    /// Pages coming back without results are skipped. An error ends the
    /// sequence. A 403 on a follow-up page ends it with
    /// [`CseError::TemporarilyBanned`].
    pub async fn next_page(&mut self) -> Result<Option<Vec<CseResult>>> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }

        while let Some(page) = self.next.filter(|p| *p <= self.last) {
            self.next = page.next();
            let response = match self.hook.fetch_page(&self.query, page).await {
                Ok(response) => response,
                Err(e) => {
                    self.next = None;
                    return Err(e);
                }
            };
            if response.is_temp_ban() {
                warn!("Temporarily banned on page {} of '{}'", page, self.query);
                self.next = None;
                return Err(CseError::TemporarilyBanned { page: page.number() });
            }
            if response.has_error() {
                warn!("Page {} of '{}' failed: {:?}", page, self.query, response.error);
            }
            if !response.results.is_empty() {
                return Ok(Some(response.results));
            }
            debug!("Page {} of '{}' is empty, skipping", page, self.query);
        }

        self.next = None;
        Ok(None)
    }

    /// Adapts the pages into a stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<CseResult>>> + 'a {
        stream::try_unfold(self, |mut pages| async move {
            Ok(pages.next_page().await?.map(|page| (page, pages)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::{StreamExt, TryStreamExt};

    use super::*;
    use crate::fetcher::tests::{ok, ScriptedTransport};
    use crate::fetcher::Attempt;
    use crate::proxy::{ProxyConfig, StaticProxyProvider};

    const CSE: &str = "https://cse.google.com/cse?cx=abc";
    const ENDPOINT: &str = "https://cse.google.com/cse/element/v1?cx=abc&cse_tok=seed";

    /// Reveals a fresh endpoint on every navigation.
    struct CountingBrowser {
        navigations: Mutex<u32>,
        recorded: Mutex<Vec<String>>,
    }

    impl CountingBrowser {
        fn new() -> Self {
            Self {
                navigations: Mutex::new(0),
                recorded: Mutex::new(Vec::new()),
            }
        }

        fn navigations(&self) -> u32 {
            *self.navigations.lock().unwrap()
        }
    }

    #[async_trait]
    impl BrowserSession for CountingBrowser {
        async fn navigate(&self, _url: &str) -> Result<()> {
            let mut n = self.navigations.lock().unwrap();
            *n += 1;
            self.recorded.lock().unwrap().push(format!(
                "https://cse.google.com/cse/element/v1?cx=abc&cse_tok=fresh{}",
                n
            ));
            Ok(())
        }

        fn recorded_requests(&self) -> Vec<String> {
            self.recorded.lock().unwrap().clone()
        }

        fn clear_requests(&self) {
            self.recorded.lock().unwrap().clear();
        }
    }

    fn proxies() -> Vec<ProxyConfig> {
        (0..5).map(|i| ProxyConfig::new("10.2.2.2", 4000 + i)).collect()
    }

    async fn hook(
        config: CseConfig,
        browser: Arc<CountingBrowser>,
        transport: Arc<ScriptedTransport>,
        seeded: bool,
    ) -> CseHook {
        let endpoints = if seeded {
            vec![Url::parse(ENDPOINT).unwrap()]
        } else {
            vec![]
        };
        CseHook::builder(config)
            .with_browser(browser)
            .with_transport(transport)
            .with_proxy_provider(Arc::new(StaticProxyProvider::new(proxies())))
            .with_endpoints(endpoints)
            .with_seed(11)
            .build()
            .await
            .unwrap()
    }

    fn config() -> CseConfig {
        CseConfig {
            probe_count: 2,
            ..CseConfig::new(CSE)
        }
    }

    #[tokio::test]
    async fn test_single_page_issues_one_fetch() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(
            r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{}]}}"#,
        )]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(config(), Arc::clone(&browser), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        assert_eq!(pages.next_page().await.unwrap().unwrap().len(), 1);
        assert!(pages.next_page().await.unwrap().is_none());
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(browser.navigations(), 0);
    }

    #[tokio::test]
    async fn test_missing_cursor_is_single_page() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(r#"{"results":[]}"#)]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        assert_eq!(pages.next_page().await.unwrap(), Some(vec![]));
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ban_stops_search() {
        let transport = Arc::new(ScriptedTransport::new(vec![Attempt::Response {
            status: 403,
            body: String::new(),
        }]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let outcome = hook.search("cards", false).await.unwrap();
        assert!(outcome.is_banned());
        assert!(outcome.into_pages().is_none());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_early_stop_issues_no_more_requests() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(
            r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{},{}]}}"#,
        )]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        pages.next_page().await.unwrap();
        drop(pages);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_two_pages_two_fetches() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{}]}}"#),
            ok(r#"{"results":[{"url":"https://b"}]}"#),
        ]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let pages: Vec<_> = hook
            .search("cards", false)
            .await
            .unwrap()
            .into_pages()
            .unwrap()
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            pages,
            vec![
                vec![CseResult::new("https://a")],
                vec![CseResult::new("https://b")]
            ]
        );
        assert_eq!(transport.call_count(), 2);
        let calls = transport.calls.lock().unwrap();
        assert!(calls[1].0.query().unwrap().ends_with("q=cards&start=10"));
    }

    #[tokio::test]
    async fn test_empty_pages_are_skipped() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{},{}]}}"#),
            ok(r#"{"results":[]}"#),
            ok(r#"{"results":[{"url":"https://c"}]}"#),
        ]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        assert_eq!(pages.next_page().await.unwrap().unwrap()[0].url, "https://a");
        assert_eq!(pages.next_page().await.unwrap().unwrap()[0].url, "https://c");
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_ban_on_follow_up_page_ends_sequence() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{},{}]}}"#),
            Attempt::Response {
                status: 403,
                body: "Forbidden".into(),
            },
            ok(r#"{"results":[{"url":"https://c"}]}"#),
        ]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        assert_eq!(pages.next_page().await.unwrap().unwrap()[0].url, "https://a");
        assert!(matches!(
            pages.next_page().await,
            Err(CseError::TemporarilyBanned { page: 2 })
        ));
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_parse_error_on_follow_up_page_ends_sequence() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{},{}]}}"#),
            Attempt::Response {
                status: 200,
                body: "<html>sorry</html>".into(),
            },
            ok(r#"{"results":[{"url":"https://c"}]}"#),
        ]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        pages.next_page().await.unwrap();
        assert!(matches!(pages.next_page().await, Err(CseError::Parse(_))));
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_on_follow_up_page_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"results":[{"url":"https://a"}],"cursor":{"pages":[{},{},{}]}}"#),
            ok(r#"{"error":{"code":400,"message":"Invalid Value"}}"#),
            ok(r#"{"results":[{"url":"https://c"}]}"#),
        ]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(config(), Arc::clone(&browser), Arc::clone(&transport), true).await;

        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        pages.next_page().await.unwrap();
        assert_eq!(pages.next_page().await.unwrap().unwrap()[0].url, "https://c");
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(transport.call_count(), 3);
        assert_eq!(browser.navigations(), 0);
    }

    #[tokio::test]
    async fn test_follow_up_pages_capped_at_ten() {
        let mut script = vec![ok(
            r#"{"results":[{"url":"https://p1"}],"cursor":{"pages":[{},{},{},{},{},{},{},{},{},{},{},{}]}}"#,
        )];
        for n in 2..=10 {
            script.push(ok(&format!(r#"{{"results":[{{"url":"https://p{}"}}]}}"#, n)));
        }
        let transport = Arc::new(ScriptedTransport::new(script));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;

        let pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        let count = pages.into_stream().count().await;
        assert_eq!(count, 10);
        assert_eq!(transport.call_count(), 10);
    }

    #[tokio::test]
    async fn test_first_search_discovers_endpoints() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(r#"{"results":[]}"#)]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(config(), Arc::clone(&browser), Arc::clone(&transport), false).await;
        assert_eq!(hook.endpoint_count().await, 0);

        hook.search("cards", false).await.unwrap();
        assert_eq!(browser.navigations(), 2);
        assert_eq!(hook.endpoint_count().await, 2);

        let calls = transport.calls.lock().unwrap();
        assert!(calls[0].0.query().unwrap().contains("cse_tok=fresh"));
    }

    #[tokio::test]
    async fn test_renew_flag_forces_discovery() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(r#"{"results":[]}"#)]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(config(), Arc::clone(&browser), Arc::clone(&transport), true).await;

        hook.search("cards", true).await.unwrap();
        assert_eq!(browser.navigations(), 2);
        let calls = transport.calls.lock().unwrap();
        assert!(!calls[0].0.query().unwrap().contains("cse_tok=seed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_endpoint_backs_off_and_rediscovers() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok(r#"{"error":{"code":400,"message":"Invalid Value"}}"#),
            ok(r#"{"results":[{"url":"https://a"}]}"#),
        ]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(config(), Arc::clone(&browser), Arc::clone(&transport), true).await;

        let started = tokio::time::Instant::now();
        let mut pages = hook.search("cards", false).await.unwrap().into_pages().unwrap();
        assert!(started.elapsed() >= hook.config().stale_backoff());
        assert_eq!(browser.navigations(), 2);
        assert_eq!(pages.next_page().await.unwrap().unwrap()[0].url, "https://a");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_retry_cap() {
        let stale = r#"{"error":{"code":400}}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![ok(stale), ok(stale), ok(stale)]));
        let browser = Arc::new(CountingBrowser::new());
        let hook = hook(
            config().with_max_stale_retries(2),
            Arc::clone(&browser),
            Arc::clone(&transport),
            true,
        )
        .await;

        match hook.search("cards", false).await {
            Err(CseError::StaleEndpoints { attempts }) => assert_eq!(attempts, 2),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("expected stale endpoints error"),
        }
        assert_eq!(transport.call_count(), 3);
        assert_eq!(browser.navigations(), 4);
    }

    #[tokio::test]
    async fn test_builder_requires_browser() {
        let result = CseHook::builder(config())
            .with_proxy_provider(Arc::new(StaticProxyProvider::new(proxies())))
            .build()
            .await;
        assert!(matches!(result, Err(CseError::Config(_))));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_cse_uri() {
        let result = CseHook::builder(CseConfig::new("https://example.com/?q=1"))
            .with_browser(Arc::new(CountingBrowser::new()))
            .with_proxy_provider(Arc::new(StaticProxyProvider::new(proxies())))
            .build()
            .await;
        assert!(matches!(result, Err(CseError::Config(_))));
    }

    #[tokio::test]
    async fn test_builder_fetches_initial_proxies() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), transport, true).await;
        assert_eq!(hook.proxy_pool().len().await, 5);
        assert_eq!(hook.proxy_pool().generation().await, 1);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let hook = hook(config(), Arc::new(CountingBrowser::new()), Arc::clone(&transport), true).await;
        assert!(matches!(
            hook.search("   ", false).await,
            Err(CseError::InvalidQuery(_))
        ));
        assert_eq!(transport.call_count(), 0);
    }
}
