//! Notification payloads for push messages and content updates.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::config::NotificationsConfig;

/// Action id that opens (or focuses) the application.
pub const ACTION_OPEN: &str = "explore";
/// Action id that only dismisses the notification.
pub const ACTION_DISMISS: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub tag: Option<String>,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  fn new(config: &NotificationsConfig, title: &str, body: &str) -> Self {
    Self {
      title: title.to_string(),
      body: body.to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      tag: None,
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN.to_string(),
          title: "Open app".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

/// Notification for a push message. Blank payloads use the default body.
pub fn push_notification(config: &NotificationsConfig, payload: Option<&str>) -> Notification {
  let body = payload
    .map(str::trim)
    .filter(|text| !text.is_empty())
    .unwrap_or(&config.default_body);

  Notification {
    tag: Some("push".to_string()),
    ..Notification::new(config, &config.title, body)
  }
}

/// Notification announcing freshly published content.
pub fn content_notification(config: &NotificationsConfig, new_items: usize) -> Notification {
  let body = if new_items == 1 {
    "1 new update is available".to_string()
  } else {
    format!("{} new updates are available", new_items)
  };

  Notification {
    tag: Some("content-update".to_string()),
    ..Notification::new(config, "New content available", &body)
  }
}

/// Whether a click with this action should bring the application up.
pub fn opens_app(action: Option<&str>) -> bool {
  action == Some(ACTION_OPEN)
}

#[derive(Debug, Deserialize)]
struct LatestContent {
  #[serde(default)]
  items: Vec<serde_json::Value>,
}

/// Count the items in a latest-content response body.
pub fn count_new_items(body: &[u8]) -> Result<usize> {
  let latest: LatestContent = serde_json::from_slice(body)
    .map_err(|e| eyre!("Failed to parse latest content: {}", e))?;
  Ok(latest.items.len())
}
