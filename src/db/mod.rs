pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

enum Location {
  File(PathBuf),
  #[cfg(test)]
  Memory,
}

/// Lazily opened database holding the sync queue buckets.
///
/// Nothing touches the disk until the first query; the schema is applied at
/// that point.
pub struct Database {
  location: Location,
  conn: Mutex<Option<Connection>>,
}

impl Database {
  /// Database at `path`, opened on first use.
  pub fn at(path: PathBuf) -> Self {
    Self {
      location: Location::File(path),
      conn: Mutex::new(None),
    }
  }

  /// Database that lives only as long as the value.
  #[cfg(test)]
  pub fn in_memory() -> Self {
    Self {
      location: Location::Memory,
      conn: Mutex::new(None),
    }
  }

  /// Run `f` against the connection, opening it first if needed.
  pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if guard.is_none() {
      *guard = Some(self.connect()?);
    }

    match guard.as_ref() {
      Some(conn) => f(conn),
      None => Err(eyre!("Database connection unavailable")),
    }
  }

  #[cfg(test)]
  pub fn is_open(&self) -> bool {
    self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
  }

  fn connect(&self) -> Result<Connection> {
    let conn = match &self.location {
      Location::File(path) => {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
        }
        debug!("Opening queue database at {}", path.display());
        Connection::open(path)
          .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?
      }
      #[cfg(test)]
      Location::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
    };

    Self::run_migrations(&conn)?;
    Ok(conn)
  }

  /// Run database migrations
  fn run_migrations(conn: &Connection) -> Result<()> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tables(db: &Database) -> Vec<String> {
    db.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .map_err(|e| eyre!("{}", e))?;
      let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("{}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("{}", e))?;
      Ok(names)
    })
    .unwrap()
  }

  #[test]
  fn test_opens_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue").join("queue.db");
    let db = Database::at(path.clone());

    assert!(!db.is_open());
    assert!(!path.exists());

    assert_eq!(
      tables(&db),
      vec!["deadLetters", "pendingChatMessages", "pendingForms"]
    );
    assert!(db.is_open());
    assert!(path.exists());
  }

  #[test]
  fn test_schema_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    assert_eq!(tables(&Database::at(path.clone())).len(), 3);
    assert_eq!(tables(&Database::at(path)).len(), 3);
  }
}
