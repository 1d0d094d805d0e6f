//! Request URI composition for CSE widget and API URIs.

use url::Url;

use crate::{EncodedQuery, Page};

/// Builds the request URI for `query` and `page` on top of `base`.
///
/// The base's query pairs are kept verbatim and in order, except `q` and
/// `start`, which are replaced. A repeated key keeps its first occurrence.
/// `start` is only present for pages after the first.
pub fn compose(base: &Url, query: &EncodedQuery, page: Page) -> Url {
    let mut seen: Vec<&str> = Vec::new();
    let mut pairs: Vec<String> = Vec::new();

    for pair in base.query().unwrap_or_default().split('&') {
        if pair.is_empty() {
            continue;
        }
        let key = pair.split_once('=').map_or(pair, |(k, _)| k);
        if key == "q" || key == "start" || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        pairs.push(pair.to_string());
    }

    pairs.push(format!("q={}", query));
    if page > Page::FIRST {
        pairs.push(format!("start={}", page.offset()));
    }

    let mut uri = base.clone();
    uri.set_fragment(None);
    uri.set_query(Some(&pairs.join("&")));
    uri
}
