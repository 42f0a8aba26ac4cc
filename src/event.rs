use color_eyre::Result;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::interceptor::Served;
use crate::net::Request;
use crate::notify::NotificationPayload;

/// Events the host delivers to the worker
#[derive(Debug)]
pub enum WorkerEvent {
  /// Pre-cache the static manifest
  Install,
  /// Purge stale caches and claim clients
  Activate,
  /// An intercepted request; the reply carries the served response
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Served>>,
  },
  /// Background sync trigger carrying its tag
  Sync { tag: String },
  /// Push message with optional raw payload
  Push(Option<Vec<u8>>),
  /// User activated the notification built from this payload
  NotificationClick(NotificationPayload),
  /// Periodic tick for connectivity checks
  Tick,
  Shutdown,
}

/// Event handler that merges host events with a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let ticker = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately; skip it so startup events go first.
      interval.tick().await;
      loop {
        interval.tick().await;
        if ticker.send(WorkerEvent::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for other event producers
  pub fn sender(&self) -> mpsc::UnboundedSender<WorkerEvent> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_ticks_arrive() {
    let mut events = EventHandler::new(Duration::from_millis(10));
    let event = tokio::time::timeout(Duration::from_secs(1), events.next())
      .await
      .unwrap();
    assert!(matches!(event, Some(WorkerEvent::Tick)));
  }

  #[tokio::test]
  async fn test_sender_events_are_delivered() {
    let mut events = EventHandler::new(Duration::from_secs(3600));
    events
      .sender()
      .send(WorkerEvent::Sync {
        tag: "sync-api".to_string(),
      })
      .unwrap();

    let event = events.next().await;
    assert!(matches!(event, Some(WorkerEvent::Sync { tag }) if tag == "sync-api"));
  }
}
