//! Background replay of queued mutations.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::net::Fetcher;
use crate::queue::{PendingMutation, QueueStore};

/// Retry behavior for mutations whose replay keeps failing.
///
/// The default retries forever on every trigger with no backoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPolicy {
  /// Drop a record after this many failed replays
  pub max_attempts: Option<u32>,
  /// Delay after the first failure; doubles with each further failure
  pub backoff_base: Duration,
  pub backoff_max: Duration,
}

impl SyncPolicy {
  /// How long to wait after `attempts` failures before trying again.
  pub fn backoff(&self, attempts: u32) -> Duration {
    if attempts == 0 || self.backoff_base.is_zero() {
      return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempts - 1);
    self
      .backoff_base
      .checked_mul(factor)
      .unwrap_or(self.backoff_max)
      .min(self.backoff_max)
  }

  fn is_exhausted(&self, record: &PendingMutation) -> bool {
    self
      .max_attempts
      .is_some_and(|max| record.attempts >= max)
  }

  fn is_due(&self, record: &PendingMutation, now: DateTime<Utc>) -> bool {
    match record.last_attempt_at {
      None => true,
      Some(last) => match chrono::Duration::from_std(self.backoff(record.attempts)) {
        Ok(wait) => last.checked_add_signed(wait).is_some_and(|due| now >= due),
        Err(_) => false,
      },
    }
  }
}

/// What happened during one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Ids replayed and removed
  pub replayed: Vec<i64>,
  /// Ids whose replay failed; they stay queued
  pub failed: Vec<i64>,
  /// Ids not yet due under the backoff policy
  pub deferred: Vec<i64>,
  /// Ids dropped after exhausting their attempts
  pub dropped: Vec<i64>,
  /// Another pass was already running, so this trigger did nothing
  pub skipped: bool,
}

pub struct SyncCoordinator<Q: QueueStore> {
  queue: Arc<Q>,
  fetcher: Arc<dyn Fetcher>,
  policy: SyncPolicy,
  tag: String,
  /// Held for the duration of a pass
  running: Mutex<()>,
}

impl<Q: QueueStore> SyncCoordinator<Q> {
  pub fn new(
    queue: Arc<Q>,
    fetcher: Arc<dyn Fetcher>,
    policy: SyncPolicy,
    tag: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      fetcher,
      policy,
      tag: tag.into(),
      running: Mutex::new(()),
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Handle a host sync trigger. Triggers for other tags are ignored.
  pub async fn handle_sync(&self, tag: &str) -> Option<Result<SyncReport>> {
    if tag != self.tag {
      debug!(tag, "ignoring sync trigger for another tag");
      return None;
    }
    Some(self.run_pass().await)
  }

  /// Replay every queued record once, in listed order.
  ///
  /// Successful replays are removed; failures stay queued for the next
  /// trigger. Only a failure to list the queue aborts the pass.
  pub async fn run_pass(&self) -> Result<SyncReport> {
    let Ok(_guard) = self.running.try_lock() else {
      info!("sync pass already running, skipping trigger");
      return Ok(SyncReport {
        skipped: true,
        ..SyncReport::default()
      });
    };

    let records = self.queue.list_all()?;
    let mut report = SyncReport::default();

    for record in records {
      let now = Utc::now();

      if self.policy.is_exhausted(&record) {
        warn!(
          id = record.id,
          method = %record.method,
          url = %record.url,
          attempts = record.attempts,
          "dropping queued request after too many failed replays"
        );
        match self.queue.remove(record.id) {
          Ok(()) => report.dropped.push(record.id),
          Err(e) => warn!(id = record.id, error = %e, "failed to drop queued request"),
        }
        continue;
      }

      if !self.policy.is_due(&record, now) {
        report.deferred.push(record.id);
        continue;
      }

      match self.fetcher.fetch(&record.to_request()).await {
        Ok(response) => {
          debug!(id = record.id, status = response.status, "replayed queued request");
          match self.queue.remove(record.id) {
            Ok(()) => report.replayed.push(record.id),
            Err(e) => warn!(id = record.id, error = %e, "failed to remove replayed request"),
          }
        }
        Err(e) => {
          info!(id = record.id, url = %record.url, error = %e, "sync request failed");
          if let Err(e) = self.queue.record_failure(record.id, now) {
            warn!(id = record.id, error = %e, "failed to record replay attempt");
          }
          report.failed.push(record.id);
        }
      }
    }

    info!(
      replayed = report.replayed.len(),
      failed = report.failed.len(),
      deferred = report.deferred.len(),
      dropped = report.dropped.len(),
      "sync pass finished"
    );
    Ok(report)
  }
}
