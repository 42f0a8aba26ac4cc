mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open or create the database at `path` and run migrations.
///
/// Both the cache store and the queue store call this; each keeps its own connection.
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  conn
    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
    .map_err(|e| eyre!("Failed to enable WAL journal: {}", e))?;
  conn
    .busy_timeout(std::time::Duration::from_secs(5))
    .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

  run_migrations(&conn)?;
  Ok(conn)
}

/// Open a private in-memory database with the full schema.
#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
  let conn =
    Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
  run_migrations(&conn)?;
  Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
  conn
    .execute_batch(schema::SCHEMA)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))
}

/// Parse a datetime string from SQLite format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

/// Format a timestamp the way SQLite's `datetime()` does.
pub fn format_datetime(at: DateTime<Utc>) -> String {
  at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_migrations_are_idempotent() {
    let conn = open_in_memory().unwrap();
    run_migrations(&conn).unwrap();
  }

  #[test]
  fn test_datetime_round_trips_sqlite_format() {
    let at = parse_datetime("2026-03-01 12:30:00").unwrap();
    assert_eq!(format_datetime(at), "2026-03-01 12:30:00");
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("owner-sync.db");
    open(&path).unwrap();
    assert!(path.exists());
  }
}
