//! Versioned cache lifecycle: install, activate, lookup and store.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::key::RequestKey;
use super::storage::{CacheEntry, CacheStorage};
use crate::clients::ClientHost;
use crate::net::{Fetcher, Request, Response};

/// Outcome of pre-caching the static manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

impl InstallReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Outcome of activating the current cache version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale cache generations that were deleted
  pub deleted: Vec<String>,
  /// Client windows taken over by this worker
  pub claimed: usize,
}

/// Owns every cached response, organized in named generations of which
/// exactly one (the current version) is live.
pub struct CacheManager<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  clients: Arc<dyn ClientHost>,
  version: String,
  manifest: Vec<String>,
  origin: Url,
}

impl<S: CacheStorage> CacheManager<S> {
  pub fn new(
    storage: S,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn ClientHost>,
    version: impl Into<String>,
    manifest: Vec<String>,
    origin: &str,
  ) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;

    Ok(Self {
      storage: Arc::new(storage),
      fetcher,
      clients,
      version: version.into(),
      manifest,
      origin,
    })
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn manifest(&self) -> &[String] {
    &self.manifest
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn cache_names(&self) -> Result<Vec<String>> {
    self.storage.cache_names()
  }

  pub fn entry_count(&self) -> Result<usize> {
    self.storage.entry_count(&self.version)
  }

  /// Open the current cache and pre-populate it with the manifest.
  ///
  /// Failures are logged and reported but never fatal: a partially filled
  /// cache still leaves the app usable.
  pub async fn install(&self) -> InstallReport {
    let mut report = InstallReport::default();

    if let Err(e) = self.storage.open_cache(&self.version) {
      warn!(version = %self.version, error = %e, "cache installation failed");
      report.failed = self.manifest.clone();
      return report;
    }

    let fetches = self.manifest.iter().map(|url| async move {
      let request = Request::get(url.as_str());
      let result = self.fetcher.fetch(&request).await;
      (request, result)
    });

    for (request, result) in join_all(fetches).await {
      let stored = match result {
        Ok(response) if response.is_cacheable() => self.store(&request, &response),
        Ok(response) => Err(eyre!(
          "unexpected {} response ({})",
          response.status,
          response.response_type.as_str()
        )),
        Err(e) => Err(e),
      };

      match stored {
        Ok(_) => report.cached.push(request.url),
        Err(e) => {
          warn!(url = %request.url, error = %e, "failed to pre-cache asset");
          report.failed.push(request.url);
        }
      }
    }

    info!(
      version = %self.version,
      cached = report.cached.len(),
      failed = report.failed.len(),
      "cache installed"
    );
    report
  }

  /// Delete every cache generation except the current one, then take over
  /// all open client windows.
  pub fn activate(&self) -> Result<ActivateReport> {
    let mut report = ActivateReport::default();

    for name in self.storage.cache_names()? {
      if name != self.version && self.storage.delete_cache(&name)? {
        info!(cache = %name, "deleted stale cache");
        report.deleted.push(name);
      }
    }

    // An activation with no prior install still leaves the current generation in place.
    self.storage.open_cache(&self.version)?;

    report.claimed = self.clients.claim()?;
    info!(
      version = %self.version,
      deleted = report.deleted.len(),
      claimed = report.claimed,
      "cache activated"
    );
    Ok(report)
  }

  /// Look up `request` in the current cache. Storage errors count as a miss.
  pub fn lookup(&self, request: &Request) -> Option<CacheEntry> {
    let key = match RequestKey::new(request, &self.origin) {
      Ok(key) => key,
      Err(e) => {
        debug!(error = %e, "uncacheable request");
        return None;
      }
    };

    match self.storage.get_entry(&self.version, &key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key.description(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Write `response` under `request` in the current cache.
  ///
  /// Returns `false` without touching storage when the response is not
  /// cacheable (non-200, opaque or error).
  pub fn store(&self, request: &Request, response: &Response) -> Result<bool> {
    if !response.is_cacheable() {
      debug!(
        url = %request.url,
        status = response.status,
        kind = response.response_type.as_str(),
        "refusing to cache response"
      );
      return Ok(false);
    }

    let key = RequestKey::new(request, &self.origin)?;
    self.storage.put_entry(&self.version, &key, response)?;
    debug!(key = %key.description(), "cached response");
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteCacheStorage;
  use crate::clients::WindowRegistry;
  use crate::db;
  use crate::net::ResponseType;
  use crate::testing::FakeFetcher;

  const ORIGIN: &str = "http://localhost:5000";

  fn manifest() -> Vec<String> {
    vec![
      "/".to_string(),
      "/static/css/style.css".to_string(),
      "https://cdn.example/chart.min.js".to_string(),
    ]
  }

  fn full_fetcher() -> FakeFetcher {
    FakeFetcher::new()
      .route("/", Response::new("/", 200, "<html>"))
      .route("/static/css/style.css", Response::new("/static/css/style.css", 200, "body{}"))
      .route(
        "https://cdn.example/chart.min.js",
        Response::new("https://cdn.example/chart.min.js", 200, "chart").with_type(ResponseType::Cors),
      )
  }

  fn manager_with(
    storage: SqliteCacheStorage,
    fetcher: FakeFetcher,
    clients: Arc<WindowRegistry>,
    version: &str,
  ) -> CacheManager<SqliteCacheStorage> {
    CacheManager::new(storage, Arc::new(fetcher), clients, version, manifest(), ORIGIN).unwrap()
  }

  fn manager(fetcher: FakeFetcher) -> CacheManager<SqliteCacheStorage> {
    let storage = SqliteCacheStorage::new(db::open_in_memory().unwrap());
    manager_with(storage, fetcher, Arc::new(WindowRegistry::new()), "v1")
  }

  #[tokio::test]
  async fn test_install_caches_manifest() {
    let manager = manager(full_fetcher());
    let report = manager.install().await;

    assert!(report.is_complete());
    assert_eq!(report.cached.len(), 3);
    assert_eq!(manager.entry_count().unwrap(), 3);
    assert!(manager.lookup(&Request::get("/static/css/style.css")).is_some());
  }

  #[tokio::test]
  async fn test_install_partial_failure_is_not_fatal() {
    let fetcher = full_fetcher();
    fetcher.fail("https://cdn.example/chart.min.js");
    let manager = manager(fetcher);

    let report = manager.install().await;

    assert_eq!(report.failed, vec!["https://cdn.example/chart.min.js".to_string()]);
    assert_eq!(report.cached.len(), 2);
    assert_eq!(manager.cache_names().unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_install_skips_opaque_manifest_entries() {
    let fetcher = full_fetcher().route(
      "https://cdn.example/chart.min.js",
      Response::new("https://cdn.example/chart.min.js", 200, "").with_type(ResponseType::Opaque),
    );
    let manager = manager(fetcher);

    let report = manager.install().await;

    assert_eq!(report.failed.len(), 1);
    assert!(manager.lookup(&Request::get("https://cdn.example/chart.min.js")).is_none());
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let clients = Arc::new(WindowRegistry::new());

    // Two earlier deployments left their caches behind.
    for old in ["v0", "v1"] {
      let storage = SqliteCacheStorage::new(db::open(&path).unwrap());
      let manager = manager_with(storage, full_fetcher(), clients.clone(), old);
      manager.install().await;
    }

    let storage = SqliteCacheStorage::new(db::open(&path).unwrap());
    let manager = manager_with(storage, full_fetcher(), clients, "v2");
    manager.install().await;
    let report = manager.activate().unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert_eq!(manager.cache_names().unwrap(), vec!["v2".to_string()]);
  }

  #[test]
  fn test_activate_without_install_still_has_one_cache() {
    let manager = manager(FakeFetcher::new());
    manager.activate().unwrap();
    assert_eq!(manager.cache_names().unwrap(), vec!["v1".to_string()]);
  }

  #[test]
  fn test_activate_claims_open_clients() {
    let clients = Arc::new(WindowRegistry::new());
    clients.register("/").unwrap();
    let storage = SqliteCacheStorage::new(db::open_in_memory().unwrap());
    let manager = manager_with(storage, FakeFetcher::new(), clients.clone(), "v1");

    let report = manager.activate().unwrap();

    assert_eq!(report.claimed, 1);
    assert!(clients.match_all().unwrap()[0].controlled);
  }

  #[test]
  fn test_store_refuses_opaque_response() {
    let manager = manager(FakeFetcher::new());
    let request = Request::get("https://cdn.example/font.woff");
    let opaque = Response::new(request.url.clone(), 200, "").with_type(ResponseType::Opaque);

    assert!(!manager.store(&request, &opaque).unwrap());
    assert!(manager.lookup(&request).is_none());
  }

  #[test]
  fn test_lookup_miss_is_none() {
    let manager = manager(FakeFetcher::new());
    assert!(manager.lookup(&Request::get("/missing")).is_none());
  }
}
