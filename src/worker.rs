//! Wires the cache, queue, interceptor, sync coordinator and notification
//! bridge together and dispatches host events to them.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, CacheStorage, SqliteCacheStorage};
use crate::clients::ClientHost;
use crate::config::Config;
use crate::db;
use crate::event::{EventHandler, WorkerEvent};
use crate::interceptor::RequestInterceptor;
use crate::net::{Fetcher, HttpFetcher, Request};
use crate::notify::{NotificationBridge, Notifier};
use crate::queue::{QueueStore, SqliteQueue};
use crate::sync::SyncCoordinator;

pub struct ServiceWorker<S: CacheStorage + 'static, Q: QueueStore + 'static> {
  pub cache: Arc<CacheManager<S>>,
  pub interceptor: Arc<RequestInterceptor<S>>,
  pub queue: Arc<Q>,
  pub sync: Arc<SyncCoordinator<Q>>,
  pub notifications: NotificationBridge,
  fetcher: Arc<dyn Fetcher>,
  /// Last known connectivity, updated on every tick
  online: AtomicBool,
  /// Set while a connectivity check is in flight
  checking: AtomicBool,
}

impl ServiceWorker<SqliteCacheStorage, SqliteQueue> {
  /// Build a worker backed by the configured database and the real network.
  pub fn open(
    config: &Config,
    clients: Arc<dyn ClientHost>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let path = config.database_path()?;
    debug!(path = %path.display(), "opening database");

    let fetcher: Arc<dyn Fetcher> =
      Arc::new(HttpFetcher::new(&config.origin, config.network.timeout())?);
    let storage = SqliteCacheStorage::new(db::open(&path)?);
    let queue = SqliteQueue::new(db::open(&path)?);

    Self::new(config, storage, queue, fetcher, clients, notifier)
  }
}

impl<S: CacheStorage + 'static, Q: QueueStore + 'static> ServiceWorker<S, Q> {
  pub fn new(
    config: &Config,
    storage: S,
    queue: Q,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn ClientHost>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let cache = Arc::new(CacheManager::new(
      storage,
      fetcher.clone(),
      clients.clone(),
      config.cache.version.clone(),
      config.cache.manifest.clone(),
      &config.origin,
    )?);
    let interceptor = Arc::new(RequestInterceptor::new(
      cache.clone(),
      fetcher.clone(),
      config.api_prefix.clone(),
    ));
    let queue = Arc::new(queue);
    let sync = Arc::new(SyncCoordinator::new(
      queue.clone(),
      fetcher.clone(),
      config.sync.policy(),
      config.sync.tag.clone(),
    ));
    let notifications =
      NotificationBridge::new(notifier, clients, config.notifications.clone());

    Ok(Self {
      cache,
      interceptor,
      queue,
      sync,
      notifications,
      fetcher,
      online: AtomicBool::new(true),
      checking: AtomicBool::new(false),
    })
  }

  /// Check the origin is reachable. Returns true on an offline-to-online transition.
  pub async fn check_connectivity(&self) -> bool {
    let online = self.fetcher.fetch(&Request::new("HEAD", "/")).await.is_ok();
    let was_online = self.online.swap(online, Ordering::SeqCst);

    if online != was_online {
      info!(online, "connectivity changed");
    }
    online && !was_online
  }

  /// Process events until `Shutdown` or the channel closes.
  ///
  /// Fetches, sync passes and connectivity checks run as their own tasks so
  /// a slow network never holds up intercepted requests; lifecycle steps run
  /// inline.
  pub async fn run(self: Arc<Self>, mut events: EventHandler) -> Result<()> {
    while let Some(event) = events.next().await {
      match event {
        WorkerEvent::Install => {
          self.cache.install().await;
        }
        WorkerEvent::Activate => {
          if let Err(e) = self.cache.activate() {
            warn!(error = %e, "activation failed");
          }
        }
        WorkerEvent::Fetch { request, reply } => {
          let worker = Arc::clone(&self);
          tokio::spawn(async move {
            let served = worker.interceptor.fetch(&request).await;
            // The requester may have gone away; nothing to do then.
            let _ = reply.send(served);
          });
        }
        WorkerEvent::Sync { tag } => {
          let worker = Arc::clone(&self);
          tokio::spawn(async move {
            if let Some(Err(e)) = worker.sync.handle_sync(&tag).await {
              warn!(error = %e, "sync failed");
            }
          });
        }
        WorkerEvent::Push(data) => {
          self.notifications.on_push(data.as_deref());
        }
        WorkerEvent::NotificationClick(payload) => {
          let notification = self.notifications.notification_for(payload);
          match self.notifications.on_notification_activated(&notification) {
            Ok(activation) => debug!(?activation, "notification activated"),
            Err(e) => warn!(error = %e, "notification activation failed"),
          }
        }
        WorkerEvent::Tick => {
          if self.checking.swap(true, Ordering::SeqCst) {
            debug!("connectivity check still running, skipping tick");
            continue;
          }

          let worker = Arc::clone(&self);
          let sender = events.sender();
          tokio::spawn(async move {
            let reconnected = worker.check_connectivity().await;
            worker.checking.store(false, Ordering::SeqCst);
            if reconnected {
              // Reconnect counts as a sync trigger.
              let _ = sender.send(WorkerEvent::Sync {
                tag: worker.sync.tag().to_string(),
              });
            }
          });
        }
        WorkerEvent::Shutdown => break,
      }
    }

    self.interceptor.settle().await;
    info!("worker stopped");
    Ok(())
  }
}
