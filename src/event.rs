use tokio::sync::oneshot;

use crate::cache::CacheResult;
use crate::http::Request;
use crate::sync::ReplayReport;

/// Events the runtime delivers to the worker, one per wake-up.
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Background sync signal, by tag
  Sync(String),
  /// Periodic background sync signal, by tag
  PeriodicSync(String),
  /// Push message with its text payload, if any
  Push(Option<String>),
  NotificationClick {
    action: Option<String>,
    tag: Option<String>,
  },
  Message(Message),
}

/// Commands posted by a page.
#[derive(Debug)]
pub enum Message {
  SkipWaiting,
  /// Reply port for the current cache version
  GetVersion(oneshot::Sender<String>),
}

/// Lifecycle phase, for failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Install,
  Activate,
}

/// What the worker did with an event.
#[derive(Debug)]
pub enum Outcome {
  Installed {
    precached: usize,
  },
  Activated {
    deleted: Vec<String>,
  },
  /// Logged and abandoned; the runtime keeps the previous worker
  LifecycleFailed {
    phase: Phase,
    reason: String,
  },
  Respond(CacheResult),
  PassThrough,
  Synced(ReplayReport),
  ContentChecked {
    new_items: usize,
  },
  /// Best-effort background work that failed and was dropped
  Dropped(String),
  Handled,
  Ignored,
}
