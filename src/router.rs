//! Decides whether an intercepted request is handled and by which strategy.

use url::Url;

use crate::config::ApiConfig;
use reqwest::Method;

use crate::http::Request;

/// Extensions of scripts, styles, fonts and shell images.
const STATIC_EXTENSIONS: &[&str] = &[
  "js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "png", "jpg", "jpeg", "gif", "svg",
  "ico",
];

/// Extensions of content images.
const IMAGE_EXTENSIONS: &[&str] = &[
  "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "bmp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  Api,
  HtmlNavigation,
  Image,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
  NetworkFirstWithPlaceholder,
}

impl RequestClass {
  pub fn strategy(self) -> Strategy {
    match self {
      RequestClass::StaticAsset => Strategy::CacheFirst,
      RequestClass::Api => Strategy::NetworkFirst,
      RequestClass::HtmlNavigation => Strategy::StaleWhileRevalidate,
      RequestClass::Image => Strategy::NetworkFirstWithPlaceholder,
      RequestClass::Other => Strategy::NetworkFirst,
    }
  }
}

/// What to do with an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
  /// Leave it to the default network handling
  PassThrough,
  Handle {
    class: RequestClass,
    strategy: Strategy,
  },
}

pub struct Router {
  origin: Url,
  api_prefix: String,
  api_hosts: Vec<String>,
}

impl Router {
  pub fn new(origin: Url, api: &ApiConfig) -> Self {
    Self {
      origin,
      api_prefix: api.path_prefix.clone(),
      api_hosts: api.hosts.clone(),
    }
  }

  /// Only GET requests to our own origin or to a known API host are handled.
  pub fn plan(&self, request: &Request) -> Plan {
    if request.method != Method::GET {
      return Plan::PassThrough;
    }
    if !self.is_same_origin(&request.url) && !self.is_api_host(&request.url) {
      return Plan::PassThrough;
    }

    let class = self.classify(request);
    Plan::Handle {
      class,
      strategy: class.strategy(),
    }
  }

  /// First match wins: static asset, API, HTML, image, other.
  pub fn classify(&self, request: &Request) -> RequestClass {
    let extension = extension(request.url.path());
    let accept = request.accept().unwrap_or_default();

    if extension.as_deref().is_some_and(|e| STATIC_EXTENSIONS.contains(&e)) {
      return RequestClass::StaticAsset;
    }
    if self.is_api(&request.url) {
      return RequestClass::Api;
    }
    if accept.contains("text/html") {
      return RequestClass::HtmlNavigation;
    }
    if extension.as_deref().is_some_and(|e| IMAGE_EXTENSIONS.contains(&e))
      || accept.starts_with("image/")
    {
      return RequestClass::Image;
    }
    RequestClass::Other
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  fn is_api_host(&self, url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
      self
        .api_hosts
        .iter()
        .any(|pattern| host_matches(host, pattern))
    })
  }

  fn is_api(&self, url: &Url) -> bool {
    url.path().starts_with(&self.api_prefix) || self.is_api_host(url)
  }
}

/// Match a host against an API host pattern on whole labels. A pattern ending
/// in a dot names leading labels (`api.` matches `api.school.test`), anything
/// else names a domain and its subdomains.
fn host_matches(host: &str, pattern: &str) -> bool {
  if pattern.is_empty() {
    return false;
  }
  if pattern.ends_with('.') {
    host.starts_with(pattern) || host.contains(&format!(".{}", pattern))
  } else {
    host == pattern || host.ends_with(&format!(".{}", pattern))
  }
}

/// Lowercased extension of the last path segment.
fn extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (stem, ext) = segment.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}
