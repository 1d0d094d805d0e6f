//! Search query and page representation.

use std::fmt;

use crate::{CseError, Result};

/// Result offset of each page, indexed by `page - 1`.
const PAGE_OFFSETS: [u32; 10] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90];

/// A percent-encoded search term.
///
/// The value is encoded exactly once and sent on the wire as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedQuery(String);

impl EncodedQuery {
    /// Percent-encodes a raw search term.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(CseError::InvalidQuery("Query cannot be empty".into()));
        }
        Ok(Self(urlencoding::encode(raw).into_owned()))
    }

    /// Wraps a term that is already percent-encoded.
    ///
    /// Only unreserved characters and well-formed `%XX` escapes are accepted.
    pub fn from_encoded(encoded: impl Into<String>) -> Result<Self> {
        let encoded = encoded.into();
        if encoded.is_empty() {
            return Err(CseError::InvalidQuery("Query cannot be empty".into()));
        }

        let bytes = encoded.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' => {
                    let escape = bytes.get(i + 1..i + 3);
                    if !escape.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                        return Err(CseError::InvalidQuery(format!(
                            "malformed escape at byte {} in '{}'",
                            i, encoded
                        )));
                    }
                    i += 3;
                }
                b if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') => {
                    i += 1;
                }
                _ => {
                    return Err(CseError::InvalidQuery(format!(
                        "'{}' is not percent-encoded",
                        encoded
                    )));
                }
            }
        }
        Ok(Self(encoded))
    }

    /// Returns the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A result page, 1 through 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page(u32);

impl Page {
    /// The first page. It carries no `start` parameter.
    pub const FIRST: Page = Page(1);
    /// The last page the backend serves.
    pub const LAST: Page = Page(PAGE_OFFSETS.len() as u32);

    /// Creates a page, rejecting numbers outside 1..=10.
    pub fn new(number: u32) -> Result<Self> {
        if (1..=Self::LAST.0).contains(&number) {
            Ok(Self(number))
        } else {
            Err(CseError::InvalidPage(number))
        }
    }

    /// Returns the 1-based page number.
    pub fn number(self) -> u32 {
        self.0
    }

    /// Returns the result offset sent as `start`.
    pub fn offset(self) -> u32 {
        PAGE_OFFSETS[(self.0 - 1) as usize]
    }

    /// Returns the following page, if any.
    pub fn next(self) -> Option<Page> {
        (self.0 < Self::LAST.0).then(|| Page(self.0 + 1))
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
