//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use super::key::RequestKey;
use crate::db;
use crate::net::{Headers, Response, ResponseType};

/// A response snapshot stored under a request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Readable request identity ("GET https://...")
  pub request_key: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for named-cache storage backends.
///
/// Writes are last-writer-wins; no method holds a lock across an await point.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open_cache(&self, name: &str) -> Result<()>;

  /// All existing cache names.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and every entry in it. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Look up an entry in the named cache.
  fn get_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Write or overwrite an entry, creating the cache if needed.
  fn put_entry(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Number of entries in the named cache.
  fn entry_count(&self, cache: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteCacheStorage {
  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let conn = self.conn()?;
    let deleted = conn
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
    Ok(deleted > 0)
  }

  fn get_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT request_key, url, status, response_type, headers, body, cached_at
         FROM cache_entries WHERE cache_name = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![cache, key.cache_hash()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let Some((request_key, url, status, kind, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let response_type =
      ResponseType::parse(&kind).ok_or_else(|| eyre!("Unknown response type '{}'", kind))?;
    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CacheEntry {
      request_key,
      response: Response {
        url,
        status,
        response_type,
        headers,
        body,
      },
      cached_at: db::parse_datetime(&cached_at)?,
    }))
  }

  fn put_entry(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, key_hash, request_key, url, status, response_type, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache,
        key.cache_hash(),
        key.description(),
        response.url,
        response.status,
        response.response_type.as_str(),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, cache: &str) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![cache],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}
