//! Client windows controlled by the worker.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::info;

/// A dashboard window known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
  pub focused: bool,
  /// Whether this worker controls the window's requests
  pub controlled: bool,
}

/// Host-side view of the open client windows.
pub trait ClientHost: Send + Sync {
  /// Take control of every open window without a reload. Returns how many were claimed.
  fn claim(&self) -> Result<usize>;

  fn match_all(&self) -> Result<Vec<ClientWindow>>;

  fn focus(&self, id: u64) -> Result<()>;

  /// Open a new window at `url`, returning its id.
  fn open_window(&self, url: &str) -> Result<u64>;
}

/// In-process registry of client windows.
#[derive(Default)]
pub struct WindowRegistry {
  windows: Mutex<Vec<ClientWindow>>,
  next_id: Mutex<u64>,
}

impl WindowRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a window opened outside the worker (not yet controlled).
  pub fn register(&self, url: &str) -> Result<u64> {
    self.insert(url, false)
  }

  fn insert(&self, url: &str, controlled: bool) -> Result<u64> {
    let id = {
      let mut next = self.next_id.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      *next += 1;
      *next
    };

    let mut windows = self.windows.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    windows.push(ClientWindow {
      id,
      url: url.to_string(),
      focused: false,
      controlled,
    });
    Ok(id)
  }
}

impl ClientHost for WindowRegistry {
  fn claim(&self) -> Result<usize> {
    let mut windows = self.windows.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut claimed = 0;
    for window in windows.iter_mut().filter(|w| !w.controlled) {
      window.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  fn match_all(&self) -> Result<Vec<ClientWindow>> {
    let windows = self.windows.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(windows.clone())
  }

  fn focus(&self, id: u64) -> Result<()> {
    let mut windows = self.windows.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !windows.iter().any(|w| w.id == id) {
      return Err(eyre!("No client window with id {}", id));
    }
    for window in windows.iter_mut() {
      window.focused = window.id == id;
    }
    info!(id, "focused client window");
    Ok(())
  }

  fn open_window(&self, url: &str) -> Result<u64> {
    let id = self.insert(url, true)?;
    self.focus(id)?;
    info!(id, url, "opened client window");
    Ok(id)
  }
}
