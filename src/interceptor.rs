//! Per-request routing between network and cache.
//!
//! - Non-GET requests pass through untouched.
//! - GET requests under the API prefix are network-first, falling back to
//!   the cache and finally to an `{"offline": true}` placeholder.
//! - Every other GET is cache-first; fresh network responses are written
//!   back to the cache in the background.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheManager, CacheStorage};
use crate::net::{Fetcher, Request, Response};

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the host sends it to the network as-is
  Passthrough,
  /// Dynamic API data
  NetworkFirst,
  /// Static asset
  CacheFirst,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Stored snapshot from the current cache
  Cache,
  /// Synthesized placeholder, network and cache both unavailable
  Offline,
  /// Synthesized not-found for a static asset nobody could serve
  NotFound,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::NotFound => "not-found",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }

  fn from_cache(entry: CacheEntry) -> Self {
    debug!(key = %entry.request_key, cached_at = %entry.cached_at, "served from cache");
    Self::new(entry.response, ResponseSource::Cache)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
  Passthrough,
  Respond(Served),
}

pub struct RequestInterceptor<S: CacheStorage + 'static> {
  cache: Arc<CacheManager<S>>,
  fetcher: Arc<dyn Fetcher>,
  api_prefix: String,
  /// Background cache writes not yet known to be finished
  pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage + 'static> RequestInterceptor<S> {
  pub fn new(
    cache: Arc<CacheManager<S>>,
    fetcher: Arc<dyn Fetcher>,
    api_prefix: impl Into<String>,
  ) -> Self {
    Self {
      cache,
      fetcher,
      api_prefix: api_prefix.into(),
      pending_writes: Mutex::new(Vec::new()),
    }
  }

  /// Classify a request. The API path prefix is the only dynamic/static discriminant.
  pub fn classify(&self, request: &Request) -> Route {
    if !request.is_get() {
      return Route::Passthrough;
    }

    let path = match self.cache.origin().join(&request.url) {
      Ok(url) => url.path().to_string(),
      Err(_) => request.url.clone(),
    };

    if path.starts_with(&self.api_prefix) {
      Route::NetworkFirst
    } else {
      Route::CacheFirst
    }
  }

  pub async fn handle(&self, request: &Request) -> Interception {
    match self.classify(request) {
      Route::Passthrough => Interception::Passthrough,
      Route::NetworkFirst => Interception::Respond(self.network_first(request).await),
      Route::CacheFirst => Interception::Respond(self.cache_first(request).await),
    }
  }

  /// Resolve a request end to end: intercepted requests are answered by
  /// the routing policy, pass-through requests go straight to the network.
  pub async fn fetch(&self, request: &Request) -> color_eyre::Result<Served> {
    match self.handle(request).await {
      Interception::Respond(served) => Ok(served),
      Interception::Passthrough => {
        let response = self.fetcher.fetch(request).await?;
        Ok(Served::new(response, ResponseSource::Network))
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::new(response, ResponseSource::Network),
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        match self.cache.lookup(request) {
          Some(entry) => Served::from_cache(entry),
          None => Served::new(
            Response::offline_placeholder(&request.url),
            ResponseSource::Offline,
          ),
        }
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Served {
    if let Some(entry) = self.cache.lookup(request) {
      return Served::from_cache(entry);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store_in_background(request.clone(), response.clone());
        }
        Served::new(response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed for static asset");
        // A concurrent request may have filled the cache meanwhile.
        match self.cache.lookup(request) {
          Some(entry) => Served::from_cache(entry),
          None => Served::new(Response::not_found(&request.url), ResponseSource::NotFound),
        }
      }
    }
  }

  fn store_in_background(&self, request: Request, response: Response) {
    let cache = Arc::clone(&self.cache);
    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = cache.store(&request, &response) {
        warn!(url = %request.url, error = %e, "failed to cache response");
      }
    });

    // Mutex only guards the handle list and is never held across an await.
    if let Ok(mut pending) = self.pending_writes.lock() {
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
    }
  }

  /// Wait for every background cache write started so far.
  pub async fn settle(&self) {
    let handles: Vec<JoinHandle<()>> = match self.pending_writes.lock() {
      Ok(mut pending) => pending.drain(..).collect(),
      Err(_) => return,
    };

    for handle in handles {
      if let Err(e) = handle.await {
        warn!(error = %e, "background cache write panicked");
      }
    }
  }
}
