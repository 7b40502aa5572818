//! The runtime side of the worker: activation control, client windows and
//! notification display.

use async_trait::async_trait;
use color_eyre::Result;
use tracing::{debug, info};
use url::Url;

use crate::notify::Notification;

#[async_trait]
pub trait Host: Send + Sync {
  /// Activate the new worker without waiting for old pages to close.
  async fn skip_waiting(&self) -> Result<()>;

  /// Start controlling already open pages.
  async fn claim_clients(&self) -> Result<()>;

  async fn show_notification(&self, notification: &Notification) -> Result<()>;

  async fn close_notification(&self, tag: Option<&str>) -> Result<()>;

  /// Focus a window showing `url`, or open one.
  async fn focus_or_open(&self, url: &Url) -> Result<()>;
}

/// Host for command-line use: effects are printed to stdout.
pub struct ConsoleHost;

#[async_trait]
impl Host for ConsoleHost {
  async fn skip_waiting(&self) -> Result<()> {
    info!("skipWaiting requested");
    println!("worker: activating without waiting");
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    info!("Claiming clients");
    println!("worker: controlling open clients");
    Ok(())
  }

  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    debug!(
      "Showing notification {}",
      serde_json::to_string(notification).unwrap_or_default()
    );
    println!("notification: {}: {}", notification.title, notification.body);
    for action in &notification.actions {
      println!("  [{}] {}", action.action, action.title);
    }
    Ok(())
  }

  async fn close_notification(&self, tag: Option<&str>) -> Result<()> {
    println!("notification closed ({})", tag.unwrap_or("untagged"));
    Ok(())
  }

  async fn focus_or_open(&self, url: &Url) -> Result<()> {
    println!("open: {}", url);
    Ok(())
  }
}

#[cfg(test)]
pub mod testing {
  //! Host double that records every call.

  use super::*;
  use std::sync::Mutex;

  #[derive(Debug, Clone, PartialEq, Eq)]
  pub enum HostCall {
    SkipWaiting,
    ClaimClients,
    Show(Notification),
    Close(Option<String>),
    Open(String),
  }

  #[derive(Default)]
  pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
  }

  impl RecordingHost {
    pub fn calls(&self) -> Vec<HostCall> {
      self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) -> Result<()> {
      self.calls.lock().unwrap().push(call);
      Ok(())
    }
  }

  #[async_trait]
  impl Host for RecordingHost {
    async fn skip_waiting(&self) -> Result<()> {
      self.record(HostCall::SkipWaiting)
    }

    async fn claim_clients(&self) -> Result<()> {
      self.record(HostCall::ClaimClients)
    }

    async fn show_notification(&self, notification: &Notification) -> Result<()> {
      self.record(HostCall::Show(notification.clone()))
    }

    async fn close_notification(&self, tag: Option<&str>) -> Result<()> {
      self.record(HostCall::Close(tag.map(String::from)))
    }

    async fn focus_or_open(&self, url: &Url) -> Result<()> {
      self.record(HostCall::Open(url.to_string()))
    }
  }
}
