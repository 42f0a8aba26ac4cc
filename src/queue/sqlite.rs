//! SQLite-backed queue store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use super::{NewMutation, PendingMutation, QueueStore};
use crate::db;
use crate::net::Headers;

pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

type PendingRow = (
  i64,
  String,
  String,
  String,
  Option<Vec<u8>>,
  String,
  u32,
  Option<String>,
);

impl QueueStore for SqliteQueue {
  fn enqueue(&self, mutation: &NewMutation) -> Result<i64> {
    let conn = self.conn()?;
    let headers = serde_json::to_string(&mutation.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    // Single statement: the record is either fully committed or absent.
    conn
      .execute(
        "INSERT INTO pending_requests (url, method, headers, body, enqueued_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          mutation.url,
          mutation.method.to_uppercase(),
          headers,
          mutation.body
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", mutation.method, mutation.url, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self) -> Result<Vec<PendingMutation>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at, attempts, last_attempt_at
         FROM pending_requests ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending requests: {}", e))?
      .collect::<rusqlite::Result<Vec<PendingRow>>>()
      .map_err(|e| eyre!("Failed to read pending request: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, url, method, headers, body, enqueued_at, attempts, last_attempt_at)| {
          let headers: Headers = serde_json::from_str(&headers)
            .map_err(|e| eyre!("Failed to deserialize headers of request {}: {}", id, e))?;
          Ok(PendingMutation {
            id,
            url,
            method,
            headers,
            body,
            enqueued_at: db::parse_datetime(&enqueued_at)?,
            attempts,
            last_attempt_at: last_attempt_at
              .as_deref()
              .map(db::parse_datetime)
              .transpose()?,
          })
        },
      )
      .collect()
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM pending_requests WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete pending request {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "UPDATE pending_requests SET attempts = attempts + 1, last_attempt_at = ? WHERE id = ?",
        params![db::format_datetime(at), id],
      )
      .map_err(|e| eyre!("Failed to record attempt for request {}: {}", id, e))?;
    Ok(())
  }

  fn len(&self) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_requests", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending requests: {}", e))?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mutation(body: &str) -> NewMutation {
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    NewMutation {
      url: "/api/stock/adjust".to_string(),
      method: "POST".to_string(),
      headers,
      body: Some(body.as_bytes().to_vec()),
    }
  }

  fn queue() -> SqliteQueue {
    SqliteQueue::new(db::open_in_memory().unwrap())
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let queue = queue();
    let a = queue.enqueue(&mutation("a")).unwrap();
    let b = queue.enqueue(&mutation("b")).unwrap();
    assert!(b > a);
    assert_eq!(queue.len().unwrap(), 2);
  }

  #[test]
  fn test_list_all_does_not_remove() {
    let queue = queue();
    queue.enqueue(&mutation("a")).unwrap();
    assert_eq!(queue.list_all().unwrap().len(), 1);
    assert_eq!(queue.list_all().unwrap().len(), 1);
  }

  #[test]
  fn test_survives_restart_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let ids: Vec<i64> = {
      let queue = SqliteQueue::new(db::open(&path).unwrap());
      ["A", "B", "C"]
        .iter()
        .map(|body| queue.enqueue(&mutation(body)).unwrap())
        .collect()
    };

    let queue = SqliteQueue::new(db::open(&path).unwrap());
    let records = queue.list_all().unwrap();

    let bodies: Vec<&[u8]> = records.iter().map(|r| r.body.as_deref().unwrap()).collect();
    assert_eq!(bodies, vec![b"A".as_slice(), b"B".as_slice(), b"C".as_slice()]);
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    assert_eq!(records[0].headers.get("content-type").unwrap(), "application/json");
  }

  #[test]
  fn test_remove_twice_is_noop() {
    let queue = queue();
    let id = queue.enqueue(&mutation("a")).unwrap();
    let keep = queue.enqueue(&mutation("b")).unwrap();

    queue.remove(id).unwrap();
    queue.remove(id).unwrap();

    let remaining = queue.list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep);
  }

  #[test]
  fn test_ids_are_not_reused_after_remove() {
    let queue = queue();
    let a = queue.enqueue(&mutation("a")).unwrap();
    queue.remove(a).unwrap();
    let b = queue.enqueue(&mutation("b")).unwrap();
    assert!(b > a);
  }

  #[test]
  fn test_record_failure_bumps_attempts_only() {
    let queue = queue();
    let id = queue.enqueue(&mutation("a")).unwrap();
    let before = queue.list_all().unwrap().remove(0);

    let at = db::parse_datetime("2026-01-02 03:04:05").unwrap();
    queue.record_failure(id, at).unwrap();
    queue.record_failure(id + 100, at).unwrap();

    let after = queue.list_all().unwrap().remove(0);
    assert_eq!(after.attempts, 1);
    assert_eq!(after.last_attempt_at, Some(at));
    assert_eq!(after.to_request(), before.to_request());
  }

  #[test]
  fn test_null_body_round_trips() {
    let queue = queue();
    queue
      .enqueue(&NewMutation {
        body: None,
        method: "delete".to_string(),
        ..mutation("")
      })
      .unwrap();

    let record = queue.list_all().unwrap().remove(0);
    assert_eq!(record.body, None);
    assert_eq!(record.method, "DELETE");
  }
}
