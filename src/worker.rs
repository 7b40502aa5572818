//! Top-level event dispatch.
//!
//! The worker keeps no state of its own between events: everything durable
//! lives in the cache storage and the job store. Each event is handled by
//! [`Worker::handle`], and [`Worker::settle`] waits for any background work the
//! event started.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderValue, ACCEPT};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage, Generations};
use crate::config::Config;
use crate::event::{Event, Message, Outcome, Phase};
use crate::host::Host;
use crate::http::{Request, Response};
use crate::network::Fetch;
use crate::notify::{content_notification, count_new_items, opens_app, push_notification};
use crate::router::{Plan, RequestClass, Router, Strategy};
use crate::sync::{replay, JobStore, SyncTag};

pub struct Worker<S: CacheStorage, N: Fetch> {
  config: Config,
  generations: Generations,
  router: Router,
  storage: Arc<S>,
  network: Arc<N>,
  cache: CacheLayer<S, N>,
  jobs: Arc<dyn JobStore>,
  host: Arc<dyn Host>,
}

impl<S, N> Worker<S, N>
where
  S: CacheStorage + 'static,
  N: Fetch + 'static,
{
  pub fn new(
    config: Config,
    storage: Arc<S>,
    network: Arc<N>,
    jobs: Arc<dyn JobStore>,
    host: Arc<dyn Host>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let generations = Generations::new(&config.version);
    let fallback_page = config.resolve(&config.offline.fallback_page)?;

    let cache = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      generations.clone(),
      &config.offline.message,
      fallback_page,
    );
    let router = Router::new(origin, &config.api);

    Ok(Self {
      config,
      generations,
      router,
      storage,
      network,
      cache,
      jobs,
      host,
    })
  }

  pub async fn handle(&self, event: Event) -> Result<Outcome> {
    match event {
      Event::Install => Ok(self.install().await),
      Event::Activate => Ok(self.activate().await),
      Event::Fetch(request) => self.fetch(request).await,
      Event::Sync(tag) => self.sync(&tag).await,
      Event::PeriodicSync(tag) => Ok(self.periodic_sync(&tag).await),
      Event::Push(payload) => Ok(self.push(payload.as_deref()).await),
      Event::NotificationClick { action, tag } => {
        self
          .notification_click(action.as_deref(), tag.as_deref())
          .await
      }
      Event::Message(message) => self.message(message).await,
    }
  }

  /// Wait for background work started by the events handled so far.
  pub async fn settle(&self) {
    self.cache.settle().await;
  }

  async fn install(&self) -> Outcome {
    match self.precache().await {
      Ok(precached) => {
        info!(
          "Installed {}: {} assets precached",
          self.generations.shell(),
          precached
        );
        Outcome::Installed { precached }
      }
      Err(e) => {
        error!("Install failed: {}", e);
        Outcome::LifecycleFailed {
          phase: Phase::Install,
          reason: e.to_string(),
        }
      }
    }
  }

  /// Fetch the whole precache list, store it in one go, then skip waiting.
  async fn precache(&self) -> Result<usize> {
    let requests = self
      .config
      .precache
      .iter()
      .map(|path| self.config.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let responses =
      futures::future::try_join_all(requests.iter().map(|request| self.fetch_ok(request))).await?;

    let entries: Vec<(Request, Response)> = requests.into_iter().zip(responses).collect();
    self.storage.put_all(&self.generations.shell(), &entries)?;
    self.host.skip_waiting().await?;

    Ok(entries.len())
  }

  async fn fetch_ok(&self, request: &Request) -> Result<Response> {
    let response = self.network.fetch(request).await?;
    if !response.is_ok() {
      return Err(eyre!(
        "Precache of {} returned status {}",
        request.url,
        response.status
      ));
    }
    Ok(response)
  }

  /// Delete every generation not owned by this version, then claim clients.
  async fn activate(&self) -> Outcome {
    let names = match self.storage.generations() {
      Ok(names) => names,
      Err(e) => {
        error!("Activate failed: {}", e);
        return Outcome::LifecycleFailed {
          phase: Phase::Activate,
          reason: e.to_string(),
        };
      }
    };

    let mut deleted = Vec::new();
    for name in names {
      if self.generations.is_current(&name) {
        continue;
      }
      match self.storage.delete(&name) {
        Ok(_) => {
          info!("Deleted old cache {}", name);
          deleted.push(name);
        }
        Err(e) => warn!("Failed to delete old cache {}: {}", name, e),
      }
    }

    if let Err(e) = self.host.claim_clients().await {
      error!("Activate failed: {}", e);
      return Outcome::LifecycleFailed {
        phase: Phase::Activate,
        reason: e.to_string(),
      };
    }

    Outcome::Activated { deleted }
  }

  async fn fetch(&self, request: Request) -> Result<Outcome> {
    let (class, strategy) = match self.router.plan(&request) {
      Plan::PassThrough => {
        debug!("Passing through {} {}", request.method, request.url);
        return Ok(Outcome::PassThrough);
      }
      Plan::Handle { class, strategy } => (class, strategy),
    };

    let is_navigation = request.is_navigation();
    let url = request.url.clone();
    debug!("{} {:?} via {:?}", url, class, strategy);

    match self.run_strategy(request, class, strategy).await {
      Ok(result) => Ok(Outcome::Respond(result)),
      Err(e) if is_navigation => {
        warn!("Serving offline page for {}: {}", url, e);
        Ok(Outcome::Respond(self.cache.navigation_fallback()))
      }
      Err(e) => Err(e),
    }
  }

  async fn run_strategy(
    &self,
    request: Request,
    class: RequestClass,
    strategy: Strategy,
  ) -> Result<CacheResult> {
    match strategy {
      Strategy::CacheFirst => self.cache.cache_first(request).await,
      Strategy::NetworkFirst => {
        self
          .cache
          .network_first(request, class == RequestClass::Api)
          .await
      }
      Strategy::StaleWhileRevalidate => self.cache.stale_while_revalidate(request).await,
      Strategy::NetworkFirstWithPlaceholder => {
        self.cache.network_first_with_placeholder(request).await
      }
    }
  }

  async fn sync(&self, tag: &str) -> Result<Outcome> {
    let Some(bucket) = SyncTag::parse(tag).and_then(|t| t.bucket()) else {
      debug!("Ignoring sync tag {}", tag);
      return Ok(Outcome::Ignored);
    };

    let report = replay(
      self.jobs.as_ref(),
      self.network.as_ref(),
      bucket,
      self.config.sync.max_attempts,
    )
    .await?;

    Ok(Outcome::Synced(report))
  }

  async fn periodic_sync(&self, tag: &str) -> Outcome {
    if SyncTag::parse(tag) != Some(SyncTag::Content) {
      debug!("Ignoring periodic sync tag {}", tag);
      return Outcome::Ignored;
    }

    match self.check_content().await {
      Ok(new_items) => Outcome::ContentChecked { new_items },
      Err(e) => {
        warn!("Content sync dropped: {}", e);
        Outcome::Dropped(e.to_string())
      }
    }
  }

  async fn check_content(&self) -> Result<usize> {
    let url = self
      .config
      .resolve(&self.config.notifications.content_endpoint)?;
    let request =
      Request::get(url).with_header(ACCEPT, HeaderValue::from_static("application/json"));

    let response = self.network.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!(
        "{} returned status {}",
        request.url,
        response.status
      ));
    }

    let new_items = count_new_items(&response.body)?;
    if new_items > 0 {
      let notification = content_notification(&self.config.notifications, new_items);
      self.host.show_notification(&notification).await?;
    }
    Ok(new_items)
  }

  async fn push(&self, payload: Option<&str>) -> Outcome {
    let notification = push_notification(&self.config.notifications, payload);
    match self.host.show_notification(&notification).await {
      Ok(()) => Outcome::Handled,
      Err(e) => {
        warn!("Push notification dropped: {}", e);
        Outcome::Dropped(e.to_string())
      }
    }
  }

  async fn notification_click(&self, action: Option<&str>, tag: Option<&str>) -> Result<Outcome> {
    self.host.close_notification(tag).await?;

    if opens_app(action) {
      let url = self.config.resolve(&self.config.notifications.root_url)?;
      self.host.focus_or_open(&url).await?;
    }

    Ok(Outcome::Handled)
  }

  async fn message(&self, message: Message) -> Result<Outcome> {
    match message {
      Message::SkipWaiting => {
        self.host.skip_waiting().await?;
      }
      Message::GetVersion(reply) => {
        if reply.send(self.generations.version().to_string()).is_err() {
          debug!("Version requested by a closed port");
        }
      }
    }
    Ok(Outcome::Handled)
  }
}
