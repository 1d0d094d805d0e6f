//! CSE API response types.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CseError, Result};

/// `error` value marking a response the backend refused with HTTP 403.
pub const TEMP_BAN: &str = "temp_ban";

/// A single result record.
///
/// Commonly used fields are lifted out; everything else the backend sends
/// is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CseResult {
    /// Result URL.
    #[serde(default)]
    pub url: String,
    /// Title without highlighting markup.
    #[serde(
        default,
        rename = "titleNoFormatting",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
    /// Snippet without highlighting markup.
    #[serde(
        default,
        rename = "contentNoFormatting",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<String>,
    /// Display URL.
    #[serde(default, rename = "visibleUrl", skip_serializing_if = "Option::is_none")]
    pub visible_url: Option<String>,
    /// Remaining fields, verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CseResult {
    /// Creates a record with only a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Pagination cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// One entry per available page.
    #[serde(default)]
    pub pages: Vec<Value>,
    /// Remaining fields, verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded CSE API payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CseResponse {
    /// Error reported by the backend, or [`TEMP_BAN`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Results of this page.
    #[serde(default)]
    pub results: Vec<CseResult>,
    /// Pagination cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl CseResponse {
    /// The response standing in for an HTTP 403.
    pub fn temp_ban() -> Self {
        Self {
            error: Some(Value::String(TEMP_BAN.to_string())),
            ..Default::default()
        }
    }

    /// Whether this is the 403 stand-in.
    pub fn is_temp_ban(&self) -> bool {
        self.error.as_ref().and_then(Value::as_str) == Some(TEMP_BAN)
    }

    /// Whether the backend reported a non-empty error.
    pub fn has_error(&self) -> bool {
        match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    /// Number of pages the cursor advertises.
    pub fn page_count(&self) -> usize {
        self.cursor.as_ref().map_or(0, |c| c.pages.len())
    }
}

fn payload_regex() -> &'static Regex {
    static PAYLOAD: OnceLock<Regex> = OnceLock::new();
    PAYLOAD.get_or_init(|| {
        Regex::new(r"(?s)google\.search\.cse\.api\d*\((.*)\)").expect("valid payload regex")
    })
}

/// Extracts and decodes the JSON argument of the
/// `google.search.cse.api<N>(...)` callback wrapping an API response body.
pub fn extract_payload(body: &str) -> Result<CseResponse> {
    let captures = payload_regex()
        .captures(body)
        .ok_or_else(|| CseError::Parse("no CSE callback payload in response body".into()))?;

    let payload = captures.get(1).map_or("", |m| m.as_str());
    serde_json::from_str(payload)
        .map_err(|e| CseError::Parse(format!("invalid CSE payload JSON: {}", e)))
}
