//! Named response caches persisted in SQLite.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::http::{Request, Response, ResponseSource};

/// Listing row for an entry in a named cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub cached_at: DateTime<Utc>,
}

/// A set of named caches, each mapping request keys to stored responses.
///
/// Caches are kept in creation order; [`CacheStorage::match_any`] searches them
/// in that order.
pub struct CacheStorage {
  conn: Mutex<Connection>,
}

type EntryRow = (String, u16, String, Vec<u8>);

impl CacheStorage {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create the named cache if it doesn't exist yet.
  pub fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  pub fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |_| Ok(()))
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  /// Names of all caches, oldest first.
  pub fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare cache listing: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;
    Ok(names)
  }

  /// Delete a cache and everything in it. Returns false if it didn't exist.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to clear cache {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  /// Store a response under the request's key, replacing any previous entry.
  /// Only GET requests can be stored.
  pub fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
    if request.method != reqwest::Method::GET {
      return Err(eyre!(
        "Refusing to cache {} {}: only GET requests are cacheable",
        request.method,
        request.url
      ));
    }

    self.open_cache(cache_name)?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, key_hash, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          cache_name,
          key_hash(request),
          request.method.as_str(),
          request.cache_url().as_str(),
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, cache_name, e))?;

    Ok(())
  }

  /// Look up a request in one cache.
  pub fn match_in(&self, cache_name: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT url, status, headers, body FROM cache_entries
         WHERE cache_name = ? AND key_hash = ?",
        params![cache_name, key_hash(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", request.url, cache_name, e))?;

    row.map(into_response).transpose()
  }

  /// Look up a request across all caches, oldest cache first.
  pub fn match_any(&self, request: &Request) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.url, e.status, e.headers, e.body FROM cache_entries e
         INNER JOIN caches c ON c.name = e.cache_name
         WHERE e.key_hash = ?
         ORDER BY c.seq
         LIMIT 1",
        params![key_hash(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    row.map(into_response).transpose()
  }

  pub fn entries(&self, cache_name: &str) -> Result<Vec<CacheEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, cached_at FROM cache_entries
         WHERE cache_name = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare entry listing: {}", e))?;

    let rows = stmt
      .query_map(params![cache_name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", cache_name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, status, cached_at)| {
        Ok(CacheEntry {
          method,
          url,
          status,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }

  pub fn entry_count(&self, cache_name: &str) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![cache_name],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n as usize)
      .map_err(|e| eyre!("Failed to count entries of {}: {}", cache_name, e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One stored response per request key per cache
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);
"#;

/// SHA256 of the request key, for stable fixed-length lookups
fn key_hash(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.cache_key().as_bytes());
  hex::encode(hasher.finalize())
}

fn into_response((url, status, headers, body): EntryRow) -> Result<Response> {
  let url = Url::parse(&url).map_err(|e| eyre!("Invalid cached URL '{}': {}", url, e))?;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to parse cached headers for {}: {}", url, e))?;

  Ok(Response {
    url,
    status,
    headers,
    body,
    source: ResponseSource::Cache,
  })
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
