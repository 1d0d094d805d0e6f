//! Internal API endpoint discovery through a recording browser.
//!
//! The public CSE widget talks to a private API whose URIs carry
//! short-lived tokens. Loading the widget with a throwaway query in a real
//! browser and watching its outbound requests reveals a usable endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;
use url::Url;

use crate::uri::compose;
use crate::{CseError, EncodedQuery, Page, Result};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A browser that records the requests issued by the pages it loads.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Loads `url` and returns once its network activity has settled.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// URLs of every request issued since the record was last cleared,
    /// in issue order.
    fn recorded_requests(&self) -> Vec<String>;

    /// Forgets all recorded requests.
    fn clear_requests(&self);
}

/// Resolves live endpoint URIs by probing the widget with random queries.
pub struct EndpointDiscoverer {
    browser: Arc<dyn BrowserSession>,
    api_prefix: String,
    rng: Mutex<StdRng>,
}

impl EndpointDiscoverer {
    /// Creates a discoverer matching requests that start with `api_prefix`.
    pub fn new(browser: Arc<dyn BrowserSession>, api_prefix: impl Into<String>, rng: StdRng) -> Self {
        Self {
            browser,
            api_prefix: api_prefix.into(),
            rng: Mutex::new(rng),
        }
    }

    /// Generates `count` random alphabetic words of `length` letters.
    pub fn probe_words(&self, count: usize, length: usize) -> Vec<String> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..count)
            .map(|_| {
                (0..length)
                    .filter_map(|_| ALPHABET.choose(&mut *rng).map(|&b| b as char))
                    .collect()
            })
            .collect()
    }

    /// Runs one discovery round of `probe_count` probes.
    ///
    /// Every probe must reveal an endpoint; the result may contain
    /// duplicates. The request record is cleared after each probe.
    pub async fn discover(
        &self,
        cse_base: &Url,
        probe_count: usize,
        word_length: usize,
    ) -> Result<Vec<Url>> {
        let mut endpoints = Vec::with_capacity(probe_count);

        for probe in self.probe_words(probe_count, word_length) {
            let query = EncodedQuery::new(&probe)?;
            let uri = compose(cse_base, &query, Page::FIRST);

            let navigated = self.browser.navigate(uri.as_str()).await;
            let found = self
                .browser
                .recorded_requests()
                .into_iter()
                .find(|request| request.starts_with(&self.api_prefix));
            self.browser.clear_requests();
            navigated?;

            let endpoint = found.ok_or_else(|| CseError::EndpointNotFound {
                probe: probe.clone(),
            })?;
            debug!("Probe '{}' revealed endpoint {}", probe, endpoint);
            endpoints.push(Url::parse(&endpoint)?);
        }

        Ok(endpoints)
    }
}
