//! Push notifications and notification activation routing.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::clients::ClientHost;
use crate::config::NotificationConfig;

/// Push payload as sent by the backend. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationPayload {
  pub title: Option<String>,
  pub body: Option<String>,
}

impl NotificationPayload {
  /// Parse leniently: absent or malformed data yields an empty payload.
  pub fn parse(data: Option<&[u8]>) -> Self {
    let Some(data) = data else {
      return Self::default();
    };

    match serde_json::from_slice(data) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "malformed push payload, using defaults");
        Self::default()
      }
    }
  }
}

/// A notification as displayed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
}

/// Displays and dismisses system notifications.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;

  fn close(&self, tag: &str) -> Result<()>;
}

/// Notifier that reports notifications through the log and keeps the
/// visible set keyed by tag, so a repeat push replaces the earlier one.
#[derive(Default)]
pub struct LogNotifier {
  visible: Mutex<BTreeMap<String, Notification>>,
}

impl LogNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn visible(&self) -> Vec<Notification> {
    self
      .visible
      .lock()
      .map(|v| v.values().cloned().collect())
      .unwrap_or_default()
  }
}

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    let mut visible = self.visible.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    info!(
      title = %notification.title,
      body = %notification.body,
      tag = %notification.tag,
      "notification"
    );
    visible.insert(notification.tag.clone(), notification.clone());
    Ok(())
  }

  fn close(&self, tag: &str) -> Result<()> {
    let mut visible = self.visible.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    visible.remove(tag);
    Ok(())
  }
}

/// Which action an activation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Focused(u64),
  Opened(u64),
}

pub struct NotificationBridge {
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn ClientHost>,
  config: NotificationConfig,
}

impl NotificationBridge {
  pub fn new(
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn ClientHost>,
    config: NotificationConfig,
  ) -> Self {
    Self {
      notifier,
      clients,
      config,
    }
  }

  /// Build the notification for a push payload, filling in defaults.
  pub fn notification_for(&self, payload: NotificationPayload) -> Notification {
    Notification {
      title: payload.title.unwrap_or_else(|| self.config.title.clone()),
      body: payload.body.unwrap_or_else(|| self.config.body.clone()),
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      tag: self.config.tag.clone(),
      require_interaction: false,
    }
  }

  /// Show a notification for a push. Never fails; display errors are logged.
  pub fn on_push(&self, data: Option<&[u8]>) -> Notification {
    let notification = self.notification_for(NotificationPayload::parse(data));
    if let Err(e) = self.notifier.show(&notification) {
      warn!(error = %e, "failed to show notification");
    }
    notification
  }

  /// Close the notification, then focus the app root window or open a new one.
  pub fn on_notification_activated(&self, notification: &Notification) -> Result<Activation> {
    if let Err(e) = self.notifier.close(&notification.tag) {
      warn!(error = %e, "failed to close notification");
    }

    let root = self
      .clients
      .match_all()?
      .into_iter()
      .find(|w| w.url == self.config.root_url);

    match root {
      Some(window) => {
        self.clients.focus(window.id)?;
        Ok(Activation::Focused(window.id))
      }
      None => {
        let id = self.clients.open_window(&self.config.root_url)?;
        Ok(Activation::Opened(id))
      }
    }
  }
}
