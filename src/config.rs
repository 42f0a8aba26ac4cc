use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::SyncPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the dashboard is served from; relative URLs resolve against it
  pub origin: String,
  /// Path prefix that marks a request as dynamic (network-first)
  pub api_prefix: String,
  /// Where the database and log files live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      api_prefix: "/api/".to_string(),
      data_dir: None,
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation tag. Bump it whenever the manifest changes.
  pub version: String,
  /// Static assets pre-cached at install
  pub manifest: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "owner-monitor-v1".to_string(),
      manifest: vec![
        "/".to_string(),
        "/static/css/style.css".to_string(),
        "/static/js/app.js".to_string(),
        "https://cdn.jsdelivr.net/npm/chart.js@3.9.1/dist/chart.min.js".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Upper bound for a single network call
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 10 }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag a sync trigger must carry to drain the queue
  pub tag: String,
  /// How often the host checks connectivity
  pub interval_secs: u64,
  /// Drop a queued mutation after this many failed replays (unset = never)
  pub max_attempts: Option<u32>,
  pub backoff_base_secs: u64,
  pub backoff_max_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-api".to_string(),
      interval_secs: 30,
      max_attempts: None,
      backoff_base_secs: 0,
      backoff_max_secs: 300,
    }
  }
}

impl SyncConfig {
  pub fn policy(&self) -> SyncPolicy {
    SyncPolicy {
      max_attempts: self.max_attempts,
      backoff_base: Duration::from_secs(self.backoff_base_secs),
      backoff_max: Duration::from_secs(self.backoff_max_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  /// Title used when a push payload has none
  pub title: String,
  /// Body used when a push payload has none
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Repeated pushes with the same tag replace each other
  pub tag: String,
  /// Window URL focused or opened when a notification is activated
  pub root_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Owner Monitor".to_string(),
      body: "New notification".to_string(),
      icon: "/static/images/icon.png".to_string(),
      badge: "/static/images/badge.png".to_string(),
      tag: "owner-monitor-notification".to_string(),
      root_url: "/".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./owner-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/owner-sync/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("owner-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("owner-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    // Zero would drop every queued mutation before its first replay.
    if self.sync.max_attempts == Some(0) {
      return Err(eyre!("sync.max_attempts must be at least 1 (omit it for unlimited)"));
    }
    Ok(())
  }

  /// Directory holding the database and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("owner-sync"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("owner-sync.db"))
  }
}
