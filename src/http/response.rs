//! Response type returned by route handlers.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::OK
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// Response produced by a route handler.
///
/// Header names are stored lower-cased, so `header("Content-Type", ..)` and
/// `header("content-type", ..)` address the same entry.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code.
    pub status: StatusCode,
    /// HTTP headers, keyed by lower-cased name.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Option<Bytes>,
}

impl Response {
    /// Create an empty response with the given status code.
    pub fn new(status: impl Into<StatusCode>) -> Self {
        Self {
            status: status.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Create an empty 200 response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create a response with a JSON body.
    pub fn json<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(data)?;
        Ok(Self::ok()
            .header("Content-Type", "application/json")
            .body(body))
    }

    /// Create a text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self::ok()
            .header("Content-Type", "text/plain")
            .body(content.into())
    }

    /// Create an error response with a plain-text message.
    pub fn error(status: impl Into<StatusCode>, message: impl Into<String>) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain")
            .body(message.into())
    }

    /// Add a header to the response, replacing any previous value.
    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Insert a header in place.
    pub fn set_header(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header value, case-insensitively.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the response carries a header with this name.
    pub fn has_header(&self, key: &str) -> bool {
        self.get_header(key).is_some()
    }

    /// Whether the response has a non-empty body.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Get the body as text if present.
    pub fn text_body(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }
}
