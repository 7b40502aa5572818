//! Queued jobs and the buckets they live in.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use crate::http::Request;

/// Logical queue inside the job database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
  /// Form submissions made while offline
  Forms,
  /// Chat messages sent while offline
  ChatMessages,
  /// Jobs that hit the attempt limit
  DeadLetters,
}

impl Bucket {
  pub fn table(&self) -> &'static str {
    match self {
      Bucket::Forms => "pendingForms",
      Bucket::ChatMessages => "pendingChatMessages",
      Bucket::DeadLetters => "deadLetters",
    }
  }
}

impl fmt::Display for Bucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table())
  }
}

impl FromStr for Bucket {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "forms" | "pendingForms" => Ok(Bucket::Forms),
      "chat" | "pendingChatMessages" => Ok(Bucket::ChatMessages),
      "dead" | "deadLetters" => Ok(Bucket::DeadLetters),
      other => Err(eyre!(
        "Unknown bucket '{}' (expected forms, chat or dead)",
        other
      )),
    }
  }
}

/// A write the page could not deliver, as handed to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
  pub url: String,
  pub method: Method,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
}

impl NewJob {
  pub fn new(method: Method, url: &str) -> Self {
    Self {
      url: url.to_string(),
      method,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  /// A JSON POST, the shape forms and chat messages are sent in.
  pub fn post_json(url: &str, body: &str) -> Self {
    let mut job = Self::new(Method::POST, url);
    job
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    job.body = Some(body.as_bytes().to_vec());
    job
  }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
  /// When the job was enqueued
  pub timestamp: DateTime<Utc>,
  /// Failed delivery attempts so far
  pub attempts: u32,
}

impl QueuedJob {
  /// Rebuild the request this job stands for.
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url)
      .map_err(|e| eyre!("Queued job {} has invalid url '{}': {}", self.id, self.url, e))?;

    Ok(Request {
      method: self.method.clone(),
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
      mode: Default::default(),
    })
  }
}
