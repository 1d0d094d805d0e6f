//! Error types for the CSE client.

use thiserror::Error;

/// Result type alias for CSE operations.
pub type Result<T> = std::result::Result<T, CseError>;

/// Errors that can occur while discovering endpoints or fetching pages.
///
/// Transient proxy failures never show up here: they are absorbed by the
/// retry loop in [`crate::ResilientFetcher`].
#[derive(Error, Debug)]
pub enum CseError {
    /// Invalid configuration, raised at construction.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Page outside the supported range.
    #[error("Invalid page {0}: pages range from 1 to 10")]
    InvalidPage(u32),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The proxy listing service could not be reached or decoded.
    #[error("Proxy listing failed: {0}")]
    ProxyList(String),

    /// A listing refresh produced no usable proxies.
    #[error("Proxy pool is empty after refresh")]
    ProxyPoolExhausted,

    /// No internal API request was observed for a discovery probe.
    #[error("Endpoint not found for probe '{probe}'")]
    EndpointNotFound {
        /// The throwaway query that failed to reveal an endpoint.
        probe: String,
    },

    /// Browser automation failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The backend refused a follow-up page with HTTP 403.
    ///
    /// A ban on the first page is reported as
    /// [`crate::SearchOutcome::Banned`] instead.
    #[error("Temporarily banned while fetching page {page}")]
    TemporarilyBanned {
        /// The page that was refused.
        page: u32,
    },

    /// Endpoints kept failing after the configured number of rediscoveries.
    #[error("Endpoints still stale after {attempts} rediscoveries")]
    StaleEndpoints {
        /// Number of rediscovery rounds performed.
        attempts: u32,
    },

    /// HTTP client error that is not a transient proxy failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = CseError::Config("bad uri".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad uri");
    }

    #[test]
    fn test_error_display_endpoint_not_found() {
        let err = CseError::EndpointNotFound {
            probe: "xKqzA".to_string(),
        };
        assert_eq!(err.to_string(), "Endpoint not found for probe 'xKqzA'");
    }

    #[test]
    fn test_error_display_invalid_page() {
        let err = CseError::InvalidPage(11);
        assert_eq!(err.to_string(), "Invalid page 11: pages range from 1 to 10");
    }

    #[test]
    fn test_error_display_stale_endpoints() {
        let err = CseError::StaleEndpoints { attempts: 3 };
        assert_eq!(err.to_string(), "Endpoints still stale after 3 rediscoveries");
    }

    #[test]
    fn test_error_display_temporarily_banned() {
        let err = CseError::TemporarilyBanned { page: 2 };
        assert_eq!(err.to_string(), "Temporarily banned while fetching page 2");
    }

    #[test]
    fn test_error_from_url_parse() {
        let err: CseError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, CseError::UrlParse(_)));
    }
}
