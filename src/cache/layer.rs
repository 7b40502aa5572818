//! Cache layer that runs the caching strategies against the network.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CacheResult, CachedResponse, Generations};
use crate::http::{Request, Response};
use crate::network::Fetch;

/// Cache layer that manages caching logic and network fetching.
///
/// All lookups check the runtime generation before the shell generation, and
/// all writes go to the runtime generation.
pub struct CacheLayer<S: CacheStorage, N: Fetch> {
  storage: Arc<S>,
  network: Arc<N>,
  generations: Generations,
  /// Localized message carried by the offline API response
  offline_message: String,
  /// Cached page tried before the built-in offline page
  fallback_page: Url,
  /// Revalidations still running after their request was answered
  background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S, N> CacheLayer<S, N>
where
  S: CacheStorage + 'static,
  N: Fetch + 'static,
{
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    generations: Generations,
    offline_message: &str,
    fallback_page: Url,
  ) -> Self {
    Self {
      storage,
      network,
      generations,
      offline_message: offline_message.to_string(),
      fallback_page,
      background: Arc::new(Mutex::new(Vec::new())),
    }
  }

  /// Find a request in the current runtime or shell generation.
  pub fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>> {
    if let Some(hit) = self
      .storage
      .match_in(&self.generations.runtime(), request)?
    {
      return Ok(Some(hit));
    }
    self.storage.match_in(&self.generations.shell(), request)
  }

  /// Opportunistic write to the runtime generation. A failed write is logged
  /// and the response is served anyway.
  fn store(&self, request: &Request, response: &Response) {
    if let Err(err) = self
      .storage
      .put(&self.generations.runtime(), request, response)
    {
      warn!("Failed to cache {}: {}", request.url, err);
    }
  }

  /// Cache-first, for static assets.
  ///
  /// 1. Serve a cached copy without touching the network
  /// 2. On a miss, fetch and store OK responses
  /// 3. Network errors propagate
  pub async fn cache_first(&self, request: Request) -> Result<CacheResult> {
    if let Some(cached) = self.lookup(&request)? {
      debug!("Serving {} from {}", request.url, cached.generation);
      return Ok(CacheResult::from_cache(cached));
    }

    let response = self.network.fetch(&request).await?;
    if response.is_ok() {
      self.store(&request, &response);
    }
    Ok(CacheResult::from_network(response))
  }

  /// Network-first, for API calls and anything unclassified.
  ///
  /// On network failure falls back to the cache, then (for API calls only) to
  /// the offline JSON response. Anything else re-raises the network error.
  pub async fn network_first(&self, request: Request, is_api: bool) -> Result<CacheResult> {
    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(&request, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        debug!("Network unavailable for {}: {}", request.url, err);
        if let Some(cached) = self.lookup(&request)? {
          return Ok(CacheResult::from_cache(cached));
        }
        if is_api {
          return Ok(CacheResult::synthesized(Response::offline_api(
            &self.offline_message,
          )));
        }
        Err(err)
      }
    }
  }

  /// Stale-while-revalidate, for HTML pages.
  ///
  /// The network fetch always starts. A cached copy is returned at once and
  /// the fetch refreshes the runtime generation for the next request; without
  /// a cached copy the caller waits for the fetch, and gets the offline page
  /// if it fails.
  pub async fn stale_while_revalidate(&self, request: Request) -> Result<CacheResult> {
    // Looked up before the refresh is spawned so that it can never overwrite
    // the entry this request is answered from.
    let cached = self.lookup(&request)?;
    let fresh = self.revalidate(request);

    if let Some(cached) = cached {
      return Ok(CacheResult::from_cache(cached));
    }

    match fresh.await {
      Ok(Ok(response)) => Ok(CacheResult::from_network(response)),
      Ok(Err(err)) => {
        debug!("Page unavailable, serving offline page: {}", err);
        Ok(self.navigation_fallback())
      }
      Err(_) => Ok(self.navigation_fallback()),
    }
  }

  /// Network-first with a placeholder, for images. Never fails on network
  /// errors or non-OK statuses.
  pub async fn network_first_with_placeholder(&self, request: Request) -> Result<CacheResult> {
    match self.network.fetch(&request).await {
      Ok(response) if response.is_ok() => {
        self.store(&request, &response);
        return Ok(CacheResult::from_network(response));
      }
      Ok(response) => debug!("Image {} returned {}", request.url, response.status),
      Err(err) => debug!("Image {} unavailable: {}", request.url, err),
    }

    if let Some(cached) = self.lookup(&request)? {
      return Ok(CacheResult::from_cache(cached));
    }
    Ok(CacheResult::synthesized(Response::image_placeholder()))
  }

  /// Something renderable for a page navigation: the cached fallback page if
  /// there is one, else the built-in offline page.
  pub fn navigation_fallback(&self) -> CacheResult {
    let request = Request::get(self.fallback_page.clone());
    match self.lookup(&request) {
      Ok(Some(cached)) => CacheResult::from_cache(cached),
      Ok(None) => CacheResult::synthesized(Response::offline_page()),
      Err(err) => {
        warn!("Offline page lookup failed: {}", err);
        CacheResult::synthesized(Response::offline_page())
      }
    }
  }

  /// Start a tracked background fetch that refreshes the runtime generation.
  fn revalidate(&self, request: Request) -> oneshot::Receiver<Result<Response>> {
    let (tx, rx) = oneshot::channel();
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let runtime = self.generations.runtime();

    let task = tokio::spawn(async move {
      let result = network.fetch(&request).await;
      match &result {
        Ok(response) if response.is_ok() => {
          if let Err(err) = storage.put(&runtime, &request, response) {
            warn!("Failed to refresh {}: {}", request.url, err);
          }
        }
        Ok(response) => debug!("Not caching {} ({})", request.url, response.status),
        Err(err) => debug!("Revalidation of {} failed: {}", request.url, err),
      }
      // The receiver is gone when the request was already answered from cache
      let _ = tx.send(result);
    });

    if let Ok(mut background) = self.background.lock() {
      background.retain(|task| !task.is_finished());
      background.push(task);
    }

    rx
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let tasks: Vec<JoinHandle<()>> = match self.background.lock() {
      Ok(mut background) => background.drain(..).collect(),
      Err(_) => return,
    };

    for result in futures::future::join_all(tasks).await {
      if let Err(err) = result {
        warn!("Background revalidation panicked: {}", err);
      }
    }
  }
}

impl<S: CacheStorage, N: Fetch> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      generations: self.generations.clone(),
      offline_message: self.offline_message.clone(),
      fallback_page: self.fallback_page.clone(),
      background: Arc::clone(&self.background),
    }
  }
}
