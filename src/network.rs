//! Network access used by the caching strategies, install and sync replay.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{Request, Response};

/// Something that can perform a request over the network.
///
/// `Err` means the request never produced a response (offline, DNS, refused
/// connection). HTTP error statuses come back as `Ok` with that status.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetch for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone());
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted network for tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  /// Answers from a URL table and records every request it sees.
  /// Unknown URLs and the offline switch both fail like a dropped connection.
  #[derive(Default)]
  pub struct MockNetwork {
    routes: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<Request>>,
    offline: AtomicBool,
  }

  impl MockNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn offline() -> Self {
      let network = Self::default();
      network.set_offline(true);
      network
    }

    pub fn respond(&self, url: &str, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
      self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
      self
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.url.as_str() == url)
        .count()
    }

    pub fn requests(&self) -> Vec<Request> {
      self.requests.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Fetch for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.requests.lock().unwrap().push(request.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
      }

      self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("Failed to fetch {}: connection refused", request.url))
    }
  }
}
