//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::CachedResponse;
use crate::http::{headers_from_json, headers_to_json, Request, Response};

/// Trait for cache storage backends.
///
/// A backend holds named generations, each a map from request key to stored
/// response. Every call is atomic on its own.
pub trait CacheStorage: Send + Sync {
  /// Names of every existing generation, oldest first.
  fn generations(&self) -> Result<Vec<String>>;

  /// Create a generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Store a response for a request, replacing any previous entry.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store a batch of entries; either all of them land or none do.
  fn put_all(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look up a request in one generation.
  fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Delete a generation and its entries. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// URLs stored in a generation.
  fn urls(&self, generation: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Cache storage that lives only as long as the value.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

fn insert_entry(
  conn: &Connection,
  generation: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = headers_to_json(&response.headers)?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (generation, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request.cache_key(),
        request.url.as_str(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, generation, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn open(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

    Ok(())
  }

  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_entry(&tx, generation, request, response)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction on error rolls everything back
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

    for (request, response) in entries {
      insert_entry(&tx, generation, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
        params![generation, request.cache_key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", request.url, generation, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers = headers_from_json(&headers)?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          generation: generation.to_string(),
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn urls(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE generation = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
pub mod testing {
  //! Storage doubles for tests.

  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// In-memory SQLite storage that counts writes.
  pub struct RecordingStorage {
    inner: SqliteStorage,
    puts: AtomicUsize,
  }

  impl RecordingStorage {
    pub fn new() -> Self {
      Self {
        inner: SqliteStorage::in_memory().unwrap(),
        puts: AtomicUsize::new(0),
      }
    }

    /// Number of single-entry `put` calls so far.
    pub fn puts(&self) -> usize {
      self.puts.load(Ordering::SeqCst)
    }
  }

  impl CacheStorage for RecordingStorage {
    fn generations(&self) -> Result<Vec<String>> {
      self.inner.generations()
    }

    fn open(&self, generation: &str) -> Result<()> {
      self.inner.open(generation)
    }

    fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
      self.puts.fetch_add(1, Ordering::SeqCst);
      self.inner.put(generation, request, response)
    }

    fn put_all(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()> {
      self.inner.put_all(generation, entries)
    }

    fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedResponse>> {
      self.inner.match_in(generation, request)
    }

    fn delete(&self, generation: &str) -> Result<bool> {
      self.inner.delete(generation)
    }

    fn urls(&self, generation: &str) -> Result<Vec<String>> {
      self.inner.urls(generation)
    }
  }

  /// Storage that can still be read but refuses every write, like a full
  /// quota.
  pub struct FullStorage {
    inner: SqliteStorage,
  }

  impl FullStorage {
    pub fn new() -> Self {
      Self {
        inner: SqliteStorage::in_memory().unwrap(),
      }
    }

    /// Store an entry behind the quota check.
    pub fn seed(&self, generation: &str, request: &Request, response: &Response) {
      self.inner.put(generation, request, response).unwrap();
    }
  }

  impl CacheStorage for FullStorage {
    fn generations(&self) -> Result<Vec<String>> {
      self.inner.generations()
    }

    fn open(&self, _generation: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn put(&self, _generation: &str, _request: &Request, _response: &Response) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn put_all(&self, _generation: &str, _entries: &[(Request, Response)]) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedResponse>> {
      self.inner.match_in(generation, request)
    }

    fn delete(&self, generation: &str) -> Result<bool> {
      self.inner.delete(generation)
    }

    fn urls(&self, generation: &str) -> Result<Vec<String>> {
      self.inner.urls(generation)
    }
  }

  /// Storage whose every operation fails, like storage the runtime disabled.
  pub struct FailingStorage;

  impl CacheStorage for FailingStorage {
    fn generations(&self) -> Result<Vec<String>> {
      Err(eyre!("storage disabled"))
    }

    fn open(&self, _generation: &str) -> Result<()> {
      Err(eyre!("storage disabled"))
    }

    fn put(&self, _generation: &str, _request: &Request, _response: &Response) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn put_all(&self, _generation: &str, _entries: &[(Request, Response)]) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn match_in(&self, _generation: &str, _request: &Request) -> Result<Option<CachedResponse>> {
      Err(eyre!("storage disabled"))
    }

    fn delete(&self, _generation: &str) -> Result<bool> {
      Err(eyre!("storage disabled"))
    }

    fn urls(&self, _generation: &str) -> Result<Vec<String>> {
      Err(eyre!("storage disabled"))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("http://localhost").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::in_memory().unwrap();
    let response = Response::new(200, "body").with_header(
      reqwest::header::CONTENT_TYPE,
      reqwest::header::HeaderValue::from_static("text/plain"),
    );
    storage.put("v1-runtime", &request("/a.js"), &response).unwrap();

    let cached = storage
      .match_in("v1-runtime", &request("/a.js"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
    assert_eq!(cached.generation, "v1-runtime");

    assert!(storage.match_in("v1-shell", &request("/a.js")).unwrap().is_none());
    assert!(storage.match_in("v1-runtime", &request("/b.js")).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_entry() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage
      .put("v1-runtime", &request("/"), &Response::new(200, "old"))
      .unwrap();
    storage
      .put("v1-runtime", &request("/"), &Response::new(200, "new"))
      .unwrap();

    let cached = storage.match_in("v1-runtime", &request("/")).unwrap().unwrap();
    assert_eq!(cached.response.text(), "new");
    assert_eq!(storage.urls("v1-runtime").unwrap().len(), 1);
  }

  #[test]
  fn test_generations_and_delete() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.open("v0-shell").unwrap();
    storage.open("v0-shell").unwrap();
    storage
      .put("v1-shell", &request("/"), &Response::new(200, "shell"))
      .unwrap();

    assert_eq!(storage.generations().unwrap(), vec!["v0-shell", "v1-shell"]);

    assert!(storage.delete("v1-shell").unwrap());
    assert!(!storage.delete("v1-shell").unwrap());
    assert_eq!(storage.generations().unwrap(), vec!["v0-shell"]);
    assert!(storage.match_in("v1-shell", &request("/")).unwrap().is_none());
  }

  #[test]
  fn test_put_all_stores_every_entry() {
    let storage = SqliteStorage::in_memory().unwrap();
    let entries = vec![
      (request("/"), Response::new(200, "root")),
      (request("/manifest.json"), Response::new(200, "{}")),
    ];
    storage.put_all("v1-shell", &entries).unwrap();

    assert_eq!(
      storage.urls("v1-shell").unwrap(),
      vec!["http://localhost/", "http://localhost/manifest.json"]
    );
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .put("v1-runtime", &request("/app.css"), &Response::new(200, "css"))
        .unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let cached = storage
      .match_in("v1-runtime", &request("/app.css"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.text(), "css");
  }
}
