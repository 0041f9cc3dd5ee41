//! SQLite-backed store persistence.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{StoreBackend, StoredResponse};
use crate::net::{Response, ResponseKind};

/// Durable store backend. Survives process restarts, which is what lets a
/// freshly recycled agent serve requests it cached in an earlier life.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the backend at the default location under the user data dir.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Open the backend at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Open a transient in-memory backend.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offramp").join("stores.db"))
  }

  /// Run database migrations for store tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
-- One row per named store generation
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    opened_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by hashed request identity
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    reason TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, entry_key),
    FOREIGN KEY (store_name) REFERENCES stores(name)
);

CREATE INDEX IF NOT EXISTS idx_entries_store ON entries(store_name);
"#;

impl StoreBackend for SqliteBackend {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO stores (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open store {}: {}", name, e))?;

    Ok(())
  }

  fn put(&self, name: &str, key: &str, identity: &str, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let kind = match response.kind {
      ResponseKind::Basic => "basic",
      ResponseKind::Opaque => "opaque",
    };

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (store_name, entry_key, identity, status, reason, headers, body, kind, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![name, key, identity, response.status, response.reason, headers, response.body, kind],
      )
      .map_err(|e| eyre!("Failed to store entry in {}: {}", name, e))?;

    Ok(())
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, reason, headers, body, kind, stored_at FROM entries
         WHERE store_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    // An absent row is a miss; anything else is a real store-read failure
    // and must reach the caller's error handling.
    let row: Option<(u16, String, Vec<u8>, Vec<u8>, String, String)> = stmt
      .query_row(params![name, key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry from {}: {}", name, e))?;

    let (status, reason, headers, body, kind, stored_at_str) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let headers: Vec<(String, String)> =
      serde_json::from_slice(&headers).map_err(|e| eyre!("Failed to parse headers: {}", e))?;
    let kind = match kind.as_str() {
      "opaque" => ResponseKind::Opaque,
      _ => ResponseKind::Basic,
    };
    let stored_at = parse_datetime(&stored_at_str)?;

    Ok(Some(StoredResponse {
      response: Response {
        status,
        reason,
        headers,
        body,
        kind,
      },
      stored_at,
    }))
  }

  fn delete(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM entries WHERE store_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    conn
      .execute("DELETE FROM stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    Ok(())
  }

  fn list_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM stores ORDER BY opened_at, name")
      .map_err(|e| eyre!("Failed to prepare store list query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn len(&self, name: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE store_name = ?",
        params![name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", name, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
