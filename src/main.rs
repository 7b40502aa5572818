mod cache;
mod config;
mod db;
mod event;
mod host;
mod http;
mod network;
mod notify;
mod router;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use tokio::sync::oneshot;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheSource, CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Event, Message, Outcome};
use crate::host::ConsoleHost;
use crate::http::{parse_method, Request};
use crate::network::HttpNetwork;
use crate::sync::{Bucket, JobStore, NewJob, SqliteJobStore};
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "offline-sw")]
#[command(about = "Offline-first caching worker: one event per invocation")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offline-sw.yaml or $XDG_CONFIG_HOME/offline-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// More log output (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Log to stderr instead of the log file in the data directory
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the application shell
  Install,
  /// Retire old cache generations and claim clients
  Activate,
  /// Intercept a request
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Queue a write for later delivery, as the page does when offline
  Enqueue {
    /// forms or chat
    #[arg(long, default_value = "forms")]
    bucket: String,
    /// Absolute URL or path relative to the origin
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "POST")]
    method: String,
    /// Request header as "Name: value" (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,
    #[arg(long)]
    body: Option<String>,
  },
  /// List queued jobs
  Pending {
    /// forms, chat or dead
    #[arg(long, default_value = "forms")]
    bucket: String,
  },
  /// Deliver a background sync signal
  Sync { tag: String },
  /// Deliver a periodic sync signal
  PeriodicSync { tag: String },
  /// Deliver a push message
  Push { body: Option<String> },
  /// Deliver a notification click
  Click {
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    tag: Option<String>,
  },
  /// Ask the worker for its cache version
  Version,
  /// Ask the worker to activate immediately
  SkipWaiting,
  /// List cache generations and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = init_logging(&args, &data_dir)?;

  let jobs = Arc::new(SqliteJobStore::new(Database::at(
    data_dir.join("queue.db"),
  )));

  match args.command {
    Command::Enqueue {
      bucket,
      url,
      method,
      headers,
      body,
    } => enqueue(jobs.as_ref(), &config, &bucket, &url, &method, &headers, body),
    Command::Pending { bucket } => pending(jobs.as_ref(), &bucket),
    Command::Caches => {
      let storage = SqliteStorage::open(&data_dir.join("cache.db"))?;
      list_caches(&storage)
    }
    Command::Version => {
      let worker = build_worker(config, &data_dir, jobs)?;
      let (tx, rx) = oneshot::channel();
      worker
        .handle(Event::Message(Message::GetVersion(tx)))
        .await?;
      let version = rx
        .await
        .map_err(|e| eyre!("Worker did not answer the version request: {}", e))?;
      println!("{}", version);
      Ok(())
    }
    command => {
      let event = to_event(command, &config)?;
      let worker = build_worker(config, &data_dir, jobs)?;
      run_event(&worker, event).await
    }
  }
}

fn build_worker(
  config: Config,
  data_dir: &Path,
  jobs: Arc<SqliteJobStore>,
) -> Result<Worker<SqliteStorage, HttpNetwork>> {
  let storage = Arc::new(SqliteStorage::open(&data_dir.join("cache.db"))?);
  Worker::new(
    config,
    storage,
    Arc::new(HttpNetwork::new()?),
    jobs,
    Arc::new(ConsoleHost),
  )
}

fn init_logging(args: &Args, data_dir: &Path) -> Result<Option<WorkerGuard>> {
  let default_filter = match args.verbose {
    0 => "offline_sw=info",
    1 => "offline_sw=debug",
    _ => "offline_sw=trace",
  };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  if args.log_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  std::fs::create_dir_all(data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;
  let appender = tracing_appender::rolling::never(data_dir, "offline-sw.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn to_event(command: Command, config: &Config) -> Result<Event> {
  let event = match command {
    Command::Install => Event::Install,
    Command::Activate => Event::Activate,
    Command::Fetch {
      url,
      method,
      accept,
      navigate,
    } => {
      let url = config.resolve(&url)?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      request.method = parse_method(&method)?;
      if let Some(accept) = accept {
        let accept = HeaderValue::from_str(&accept)
          .map_err(|e| eyre!("Invalid Accept header '{}': {}", accept, e))?;
        request = request.with_header(ACCEPT, accept);
      }
      Event::Fetch(request)
    }
    Command::Sync { tag } => Event::Sync(tag),
    Command::PeriodicSync { tag } => Event::PeriodicSync(tag),
    Command::Push { body } => Event::Push(body),
    Command::Click { action, tag } => Event::NotificationClick { action, tag },
    Command::SkipWaiting => Event::Message(Message::SkipWaiting),
    Command::Version | Command::Enqueue { .. } | Command::Pending { .. } | Command::Caches => {
      return Err(eyre!("Command is not a worker event"));
    }
  };
  Ok(event)
}

async fn run_event(worker: &Worker<SqliteStorage, HttpNetwork>, event: Event) -> Result<()> {
  let outcome = worker.handle(event).await;
  // Background refreshes must land before the process exits
  worker.settle().await;
  print_outcome(outcome?)
}

fn print_outcome(outcome: Outcome) -> Result<()> {
  match outcome {
    Outcome::Installed { precached } => println!("installed: {} assets precached", precached),
    Outcome::Activated { deleted } => {
      if deleted.is_empty() {
        println!("activated: no old caches");
      } else {
        println!("activated: deleted {}", deleted.join(", "));
      }
    }
    Outcome::LifecycleFailed { phase, reason } => {
      return Err(eyre!("{:?} failed: {}", phase, reason));
    }
    Outcome::Respond(result) => {
      let response = &result.response;
      eprintln!(
        "{} {} (from {})",
        response.status,
        response.content_type().unwrap_or("-"),
        result.source
      );
      if let (CacheSource::Cache, Some(cached_at)) = (result.source, result.cached_at) {
        eprintln!("cached at {}", cached_at.format("%Y-%m-%d %H:%M:%S"));
      }
      let mut stdout = std::io::stdout();
      stdout
        .write_all(&response.body)
        .and_then(|_| stdout.flush())
        .map_err(|e| eyre!("Failed to write response body: {}", e))?;
    }
    Outcome::PassThrough => println!("pass-through: not intercepted"),
    Outcome::Synced(report) => println!(
      "synced: {} delivered, {} failed, {} dead-lettered",
      report.delivered, report.failed, report.dead_lettered
    ),
    Outcome::ContentChecked { new_items } => println!("content: {} new item(s)", new_items),
    Outcome::Dropped(reason) => eprintln!("dropped: {}", reason),
    Outcome::Handled => {}
    Outcome::Ignored => println!("ignored"),
  }
  Ok(())
}

fn enqueue(
  jobs: &dyn JobStore,
  config: &Config,
  bucket: &str,
  url: &str,
  method: &str,
  headers: &[String],
  body: Option<String>,
) -> Result<()> {
  let bucket: Bucket = bucket.parse()?;
  if bucket == Bucket::DeadLetters {
    return Err(eyre!("Jobs cannot be queued directly into {}", bucket));
  }

  let method = parse_method(method)?;
  let url = config.resolve(url)?;
  let mut job = match body {
    Some(body) if method == Method::POST => NewJob::post_json(url.as_str(), &body),
    body => {
      let mut job = NewJob::new(method, url.as_str());
      job.body = body.map(String::into_bytes);
      job
    }
  };
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
      .map_err(|e| eyre!("Invalid header name in '{}': {}", header, e))?;
    let value = HeaderValue::from_str(value.trim())
      .map_err(|e| eyre!("Invalid header value in '{}': {}", header, e))?;
    job.headers.insert(name, value);
  }

  let id = jobs.add(bucket, &job)?;
  println!("queued job {} in {}", id, bucket);
  Ok(())
}

fn pending(jobs: &dyn JobStore, bucket: &str) -> Result<()> {
  let bucket: Bucket = bucket.parse()?;
  for job in jobs.all(bucket)? {
    println!(
      "{}\t{}\t{} {}\t{} attempt(s)",
      job.id,
      job.timestamp.format("%Y-%m-%d %H:%M:%S"),
      job.method,
      job.url,
      job.attempts
    );
  }
  Ok(())
}

fn list_caches(storage: &dyn CacheStorage) -> Result<()> {
  for name in storage.generations()? {
    let urls = storage.urls(&name)?;
    println!("{} ({} entries)", name, urls.len());
    for url in urls {
      println!("  {}", url);
    }
  }
  Ok(())
}
