use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is registered for; other origins are cross-origin
  pub origin: String,
  /// Cache generation version; bumping it retires every older generation
  pub version: String,
  /// Paths fetched into the shell generation at install time
  pub precache: Vec<String>,
  pub api: ApiConfig,
  pub offline: OfflineConfig,
  pub notifications: NotificationsConfig,
  pub sync: SyncConfig,
  /// Where the cache and queue databases and the log file live
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Same-origin path prefix of API calls
  pub path_prefix: String,
  /// Hosts of API services, matched on whole labels: `api.` for leading
  /// labels, `workers.dev` for a domain and its subdomains. Cross-origin
  /// requests to these are intercepted too
  pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Message carried by the offline API response
  pub message: String,
  /// Cached page served to navigations that cannot be answered otherwise
  pub fallback_page: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub title: String,
  /// Body used when a push carries no text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  /// Page opened or focused from a notification
  pub root_url: String,
  /// Endpoint polled on the content-sync signal
  pub content_endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Failed deliveries after which a job is dead-lettered; unset retries
  /// forever. Must be at least 1
  pub max_attempts: Option<u32>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      version: "v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192x192.png".to_string(),
        "/icons/icon-512x512.png".to_string(),
      ],
      api: ApiConfig::default(),
      offline: OfflineConfig::default(),
      notifications: NotificationsConfig::default(),
      sync: SyncConfig::default(),
      data_dir: None,
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      path_prefix: "/api/".to_string(),
      hosts: vec!["workers.dev".to_string(), "api.".to_string()],
    }
  }
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      message: "You are currently offline. Please try again when connected.".to_string(),
      fallback_page: "/".to_string(),
    }
  }
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      title: "School Update".to_string(),
      default_body: "New update from school".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      vibrate: vec![100, 50, 100],
      root_url: "/".to_string(),
      content_endpoint: "/api/content/latest".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sw/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.version.trim().is_empty() {
      return Err(eyre!("Config field 'version' must not be empty"));
    }
    for path in &self.precache {
      self.resolve(path)?;
    }
    self.resolve(&self.offline.fallback_page)?;
    self.resolve(&self.notifications.root_url)?;
    self.resolve(&self.notifications.content_endpoint)?;
    if self.sync.max_attempts == Some(0) {
      return Err(eyre!(
        "Config field 'sync.max_attempts' must be at least 1 (leave it unset to retry forever)"
      ));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Directory holding the databases and the log file.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-sw"))
  }
}
