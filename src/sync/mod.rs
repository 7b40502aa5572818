//! Deferred sync queue: writes made while offline, replayed when the
//! runtime signals that connectivity is back.

mod job;
mod replay;
mod store;

pub use job::{Bucket, NewJob};
pub use replay::{replay, ReplayReport};
pub use store::{JobStore, SqliteJobStore};

/// Tag of a background or periodic sync signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  Forms,
  Chat,
  Content,
}

impl SyncTag {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "background-sync-forms" => Some(SyncTag::Forms),
      "background-sync-chat" => Some(SyncTag::Chat),
      "content-sync" => Some(SyncTag::Content),
      _ => None,
    }
  }

  /// Queue bucket replayed for this tag, if any.
  pub fn bucket(&self) -> Option<Bucket> {
    match self {
      SyncTag::Forms => Some(Bucket::Forms),
      SyncTag::Chat => Some(Bucket::ChatMessages),
      SyncTag::Content => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sync_tags() {
    assert_eq!(SyncTag::parse("background-sync-forms"), Some(SyncTag::Forms));
    assert_eq!(SyncTag::parse("background-sync-chat"), Some(SyncTag::Chat));
    assert_eq!(SyncTag::parse("content-sync"), Some(SyncTag::Content));
    assert_eq!(SyncTag::parse("background-sync"), None);
    assert_eq!(SyncTag::Chat.bucket(), Some(Bucket::ChatMessages));
    assert_eq!(SyncTag::Content.bucket(), None);
  }
}
