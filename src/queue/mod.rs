//! Durable queue of mutation requests that could not reach the network.
//!
//! Records are appended by an external producer and drained by the sync
//! coordinator. Each record is committed atomically; ids are never reused.

mod sqlite;

pub use sqlite::SqliteQueue;

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::{Headers, Request};

/// A mutation as handed over by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
  pub url: String,
  pub method: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

/// A queued mutation waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replays so far
  pub attempts: u32,
  pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingMutation {
  /// The request to send when replaying this record.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Trait for durable queue backends.
pub trait QueueStore: Send + Sync {
  /// Persist a mutation and return its newly assigned id.
  fn enqueue(&self, mutation: &NewMutation) -> Result<i64>;

  /// All queued records in insertion order. Nothing is removed.
  fn list_all(&self) -> Result<Vec<PendingMutation>>;

  /// Delete the record with `id`. Absent ids are ignored.
  fn remove(&self, id: i64) -> Result<()>;

  /// Note a failed replay attempt. Absent ids are ignored.
  fn record_failure(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

  fn len(&self) -> Result<usize>;
}
