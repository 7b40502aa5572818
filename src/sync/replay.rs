//! Delivery of queued jobs once connectivity returns.

use color_eyre::Result;
use tracing::{info, warn};

use super::job::{Bucket, QueuedJob};
use super::store::JobStore;
use crate::network::Fetch;

/// What a replay pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Jobs delivered and removed from the queue
  pub delivered: usize,
  /// Jobs that failed and stay queued
  pub failed: usize,
  /// Jobs that failed for the last allowed time and were dead-lettered
  pub dead_lettered: usize,
}

/// Deliver every job in `bucket`, one at a time, in id order.
///
/// A job is deleted as soon as its request gets an OK response. Any other
/// outcome leaves it queued and the pass moves on to the next job. With
/// `max_attempts` set, a job whose failure count reaches it is moved to the
/// dead-letter bucket instead.
pub async fn replay<Q, N>(
  store: &Q,
  network: &N,
  bucket: Bucket,
  max_attempts: Option<u32>,
) -> Result<ReplayReport>
where
  Q: JobStore + ?Sized,
  N: Fetch + ?Sized,
{
  let jobs = store.all(bucket)?;
  let mut report = ReplayReport::default();

  if jobs.is_empty() {
    return Ok(report);
  }
  info!("Replaying {} queued job(s) from {}", jobs.len(), bucket);

  for job in jobs {
    if deliver(network, &job).await {
      store.delete(bucket, job.id)?;
      report.delivered += 1;
      continue;
    }

    let attempts = store.record_attempt(bucket, job.id)?;
    match max_attempts {
      Some(max) if attempts >= max => {
        store.move_to(bucket, job.id, Bucket::DeadLetters)?;
        warn!(
          "Job {} from {} gave up after {} attempts",
          job.id, bucket, attempts
        );
        report.dead_lettered += 1;
      }
      _ => report.failed += 1,
    }
  }

  info!(
    "Replay of {} finished: {} delivered, {} failed, {} dead-lettered",
    bucket, report.delivered, report.failed, report.dead_lettered
  );
  Ok(report)
}

async fn deliver<N: Fetch + ?Sized>(network: &N, job: &QueuedJob) -> bool {
  let request = match job.to_request() {
    Ok(request) => request,
    Err(e) => {
      warn!("Skipping job {}: {}", job.id, e);
      return false;
    }
  };

  match network.fetch(&request).await {
    Ok(response) if response.is_ok() => {
      info!("Delivered job {} ({} {})", job.id, job.method, job.url);
      true
    }
    Ok(response) => {
      warn!(
        "Job {} rejected with status {} ({} {})",
        job.id, response.status, job.method, job.url
      );
      false
    }
    Err(e) => {
      warn!("Job {} not delivered: {}", job.id, e);
      false
    }
  }
}
