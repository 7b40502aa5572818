//! Job storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::job::{Bucket, NewJob, QueuedJob};
use crate::db::Database;
use crate::http::{headers_from_json, headers_to_json, parse_method};

/// Trait for queued job storage backends.
pub trait JobStore: Send + Sync {
  /// Persist a job, returning its id.
  fn add(&self, bucket: Bucket, job: &NewJob) -> Result<i64>;

  /// Every job in a bucket, in id order.
  fn all(&self, bucket: Bucket) -> Result<Vec<QueuedJob>>;

  /// Remove a job. Returns whether it existed.
  fn delete(&self, bucket: Bucket, id: i64) -> Result<bool>;

  /// Count one more failed attempt, returning the new total.
  fn record_attempt(&self, bucket: Bucket, id: i64) -> Result<u32>;

  /// Move a job into another bucket, keeping its data and attempt count.
  fn move_to(&self, from: Bucket, id: i64, to: Bucket) -> Result<()>;
}

/// Job storage on top of the lazily opened queue database.
pub struct SqliteJobStore {
  db: Database,
}

impl SqliteJobStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl JobStore for SqliteJobStore {
  fn add(&self, bucket: Bucket, job: &NewJob) -> Result<i64> {
    let headers = headers_to_json(&job.headers)?;
    let timestamp = Utc::now().to_rfc3339();

    self.db.with_conn(|conn| {
      conn
        .execute(
          &format!(
            "INSERT INTO {} (url, method, headers, body, timestamp) VALUES (?, ?, ?, ?, ?)",
            bucket.table()
          ),
          params![job.url, job.method.as_str(), headers, job.body, timestamp],
        )
        .map_err(|e| eyre!("Failed to queue job in {}: {}", bucket, e))?;
      Ok(conn.last_insert_rowid())
    })
  }

  fn all(&self, bucket: Bucket) -> Result<Vec<QueuedJob>> {
    self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(&format!(
          "SELECT id, url, method, headers, body, timestamp, attempts FROM {} ORDER BY id",
          bucket.table()
        ))
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], |row| {
          Ok(JobRow {
            id: row.get(0)?,
            url: row.get(1)?,
            method: row.get(2)?,
            headers: row.get(3)?,
            body: row.get(4)?,
            timestamp: row.get(5)?,
            attempts: row.get(6)?,
          })
        })
        .map_err(|e| eyre!("Failed to read {}: {}", bucket, e))?
        .collect::<rusqlite::Result<Vec<JobRow>>>()
        .map_err(|e| eyre!("Failed to read job from {}: {}", bucket, e))?;

      rows.into_iter().map(JobRow::into_job).collect()
    })
  }

  fn delete(&self, bucket: Bucket, id: i64) -> Result<bool> {
    self.db.with_conn(|conn| {
      let removed = conn
        .execute(
          &format!("DELETE FROM {} WHERE id = ?", bucket.table()),
          params![id],
        )
        .map_err(|e| eyre!("Failed to delete job {} from {}: {}", id, bucket, e))?;
      Ok(removed > 0)
    })
  }

  fn record_attempt(&self, bucket: Bucket, id: i64) -> Result<u32> {
    self.db.with_conn(|conn| {
      conn
        .query_row(
          &format!(
            "UPDATE {} SET attempts = attempts + 1 WHERE id = ? RETURNING attempts",
            bucket.table()
          ),
          params![id],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to record attempt for job {}: {}", id, e))?
        .ok_or_else(|| eyre!("Job {} not found in {}", id, bucket))
    })
  }

  fn move_to(&self, from: Bucket, id: i64, to: Bucket) -> Result<()> {
    self.db.with_conn(|conn| {
      let tx = conn
        .unchecked_transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let copied = tx
        .execute(
          &format!(
            "INSERT INTO {} (url, method, headers, body, timestamp, attempts)
             SELECT url, method, headers, body, timestamp, attempts FROM {} WHERE id = ?",
            to.table(),
            from.table()
          ),
          params![id],
        )
        .map_err(|e| eyre!("Failed to move job {} to {}: {}", id, to, e))?;
      if copied == 0 {
        return Err(eyre!("Job {} not found in {}", id, from));
      }

      tx.execute(
        &format!("DELETE FROM {} WHERE id = ?", from.table()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to delete job {} from {}: {}", id, from, e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(())
    })
  }
}

struct JobRow {
  id: i64,
  url: String,
  method: String,
  headers: String,
  body: Option<Vec<u8>>,
  timestamp: String,
  attempts: u32,
}

impl JobRow {
  fn into_job(self) -> Result<QueuedJob> {
    let method = parse_method(&self.method)?;
    let headers = headers_from_json(&self.headers)
      .map_err(|e| eyre!("Job {} has unreadable headers: {}", self.id, e))?;
    let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| eyre!("Failed to parse datetime '{}': {}", self.timestamp, e))?;

    Ok(QueuedJob {
      id: self.id,
      url: self.url,
      method,
      headers,
      body: self.body,
      timestamp,
      attempts: self.attempts,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;

  fn store() -> SqliteJobStore {
    SqliteJobStore::new(Database::in_memory())
  }

  #[test]
  fn test_add_and_list_in_id_order() {
    let store = store();
    let first = store
      .add(Bucket::Forms, &NewJob::post_json("http://s.test/a", "{}"))
      .unwrap();
    let second = store
      .add(Bucket::Forms, &NewJob::post_json("http://s.test/b", "{}"))
      .unwrap();

    let jobs = store.all(Bucket::Forms).unwrap();
    assert_eq!(
      jobs.iter().map(|j| j.id).collect::<Vec<_>>(),
      vec![first, second]
    );
    assert_eq!(jobs[0].url, "http://s.test/a");
    assert_eq!(jobs[0].method, Method::POST);
    assert_eq!(jobs[0].headers.get("content-type").unwrap(), "application/json");
    assert_eq!(jobs[0].attempts, 0);
    assert_eq!(jobs[0].body.as_deref(), Some(b"{}".as_slice()));
  }

  #[test]
  fn test_buckets_are_separate() {
    let store = store();
    store
      .add(Bucket::ChatMessages, &NewJob::post_json("http://s.test/chat", "{}"))
      .unwrap();

    assert!(store.all(Bucket::Forms).unwrap().is_empty());
    assert_eq!(store.all(Bucket::ChatMessages).unwrap().len(), 1);
  }

  #[test]
  fn test_delete() {
    let store = store();
    let id = store
      .add(Bucket::Forms, &NewJob::new(Method::PUT, "http://s.test/x"))
      .unwrap();

    assert!(store.delete(Bucket::Forms, id).unwrap());
    assert!(!store.delete(Bucket::Forms, id).unwrap());
    assert!(store.all(Bucket::Forms).unwrap().is_empty());
  }

  #[test]
  fn test_record_attempt_and_move() {
    let store = store();
    let id = store
      .add(Bucket::Forms, &NewJob::post_json("http://s.test/a", "{}"))
      .unwrap();

    assert_eq!(store.record_attempt(Bucket::Forms, id).unwrap(), 1);
    assert_eq!(store.record_attempt(Bucket::Forms, id).unwrap(), 2);

    store.move_to(Bucket::Forms, id, Bucket::DeadLetters).unwrap();
    assert!(store.all(Bucket::Forms).unwrap().is_empty());
    let dead = store.all(Bucket::DeadLetters).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);

    assert!(store.record_attempt(Bucket::Forms, id).is_err());
  }
}
