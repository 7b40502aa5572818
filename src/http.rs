//! Request and response values exchanged between the router, the caching
//! strategies and the network.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{AsHeaderName, HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Fixed 200x150 "image unavailable" placeholder. Self-contained so it renders
/// with neither network nor cache.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150"><rect width="200" height="150" fill="#f3f4f6"/><path d="M80 95l15-20 12 15 8-10 15 15z" fill="#d1d5db"/><circle cx="88" cy="62" r="7" fill="#d1d5db"/><text x="100" y="125" text-anchor="middle" font-family="sans-serif" font-size="12" fill="#6b7280">Image unavailable</text></svg>"##;

/// Minimal page served to navigations when neither network nor cache can.
pub const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>body{font-family:sans-serif;text-align:center;padding:3rem 1rem;color:#374151}button{margin-top:1rem;padding:.5rem 1rem}</style>
</head>
<body>
<h1>You are offline</h1>
<p>This page is not available offline. Check your connection and try again.</p>
<button onclick="location.reload()">Retry</button>
</body>
</html>
"#;

/// Parse a method name as typed on the command line or read back from the
/// queue. Names are case-insensitive.
pub fn parse_method(name: &str) -> Result<Method> {
  Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid HTTP method '{}': {}", name, e))
}

/// Encode headers for a SQLite column, as a JSON array of `[name, value]`
/// pairs. Values that are not visible ASCII are dropped.
pub fn headers_to_json(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, &str)> = headers
    .iter()
    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
    .collect();
  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

/// Decode a column written by [`headers_to_json`].
pub fn headers_from_json(json: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, String)> =
    serde_json::from_str(json).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::with_capacity(pairs.len());
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(&value)
      .map_err(|e| eyre!("Invalid stored value for header {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Subresource, XHR or anything else
  #[default]
  Other,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: None,
      mode: RequestMode::Other,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation, as a browser sends it.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
    .with_header(
      ACCEPT,
      HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
    )
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  pub fn accept(&self) -> Option<&str> {
    self.header(ACCEPT)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Stable key identifying this request inside a cache generation.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response, either from the network, from a cache generation or
/// synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header(CONTENT_TYPE)
  }

  /// True for 2xx statuses.
  pub fn is_ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  #[cfg(test)]
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// The structured offline signal returned to API callers.
  pub fn offline_api(message: &str) -> Self {
    let body = serde_json::json!({
      "success": false,
      "error": "Offline",
      "message": message,
    });
    Self::new(503, body.to_string())
      .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
  }

  pub fn image_placeholder() -> Self {
    Self::new(200, PLACEHOLDER_SVG)
      .with_header(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"))
  }

  pub fn offline_page() -> Self {
    Self::new(503, OFFLINE_HTML).with_header(
      CONTENT_TYPE,
      HeaderValue::from_static("text/html; charset=utf-8"),
    )
  }
}
