//! Core types for the cache generations and the strategy results.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// Names of the two generations owned by the current worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  version: String,
}

impl Generations {
  pub fn new(version: &str) -> Self {
    Self {
      version: version.to_string(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Generation holding the precached application shell.
  pub fn shell(&self) -> String {
    format!("{}-shell", self.version)
  }

  /// Generation holding resources cached while handling requests.
  pub fn runtime(&self) -> String {
    format!("{}-runtime", self.version)
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.shell() || name == self.runtime()
  }
}

/// A response found in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// Generation the entry was found in
  pub generation: String,
  /// When the entry was stored
  pub cached_at: DateTime<Utc>,
}

/// Result from a strategy, including the response and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  /// The response handed back to the page
  pub response: Response,
  /// Where the response came from
  pub source: CacheSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: CacheSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// A response built locally because neither network nor cache could answer.
  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// Served from a cache generation
  Cache,
  /// Offline JSON, placeholder image or offline page
  Synthesized,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Synthesized => write!(f, "synthesized"),
    }
  }
}
