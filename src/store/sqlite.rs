//! SQLite implementation of the key/value store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};

use super::traits::{KeyValueStore, StoreError, StoreResult};

/// Reserved store holding per-database session flags.
pub const SESSION_STORE: &str = "_session";

/// Name, version and logical stores of one database.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseSpec {
  pub name: &'static str,
  pub version: u32,
  pub stores: &'static [&'static str],
}

/// Where a database lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
  File(PathBuf),
  Memory,
}

/// SQLite-backed store, opened lazily on first use.
///
/// The open happens at most once per instance. A failed open is remembered and
/// every later operation reports [`StoreError::Unavailable`] without retrying.
pub struct SqliteStore {
  spec: DatabaseSpec,
  location: StoreLocation,
  conn: OnceLock<Result<Mutex<Connection>, String>>,
}

impl SqliteStore {
  /// Create a store handle. Nothing is opened until the first operation.
  pub fn new(spec: DatabaseSpec, location: StoreLocation) -> Self {
    Self {
      spec,
      location,
      conn: OnceLock::new(),
    }
  }

  /// Store at `<data_dir>/<name>.db`.
  pub fn in_dir(spec: DatabaseSpec, data_dir: &Path) -> Self {
    let path = data_dir.join(format!("{}.db", spec.name));
    Self::new(spec, StoreLocation::File(path))
  }

  /// Private in-memory database.
  pub fn in_memory(spec: DatabaseSpec) -> Self {
    Self::new(spec, StoreLocation::Memory)
  }

  /// Whether the database has been opened successfully.
  pub fn is_available(&self) -> bool {
    self.connection().is_ok()
  }

  fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
    let slot = self.conn.get_or_init(|| match self.open() {
      Ok(conn) => Ok(Mutex::new(conn)),
      Err(e) => {
        warn!(database = self.spec.name, error = %e, "cache database unavailable");
        Err(e.to_string())
      }
    });

    match slot {
      Ok(conn) => conn
        .lock()
        .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e))),
      Err(message) => Err(StoreError::Unavailable(message.clone())),
    }
  }

  fn open(&self) -> StoreResult<Connection> {
    let mut conn = match &self.location {
      StoreLocation::File(path) => {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Unavailable(format!("failed to create cache directory: {}", e))
          })?;
        }
        Connection::open(path).map_err(|e| {
          StoreError::Unavailable(format!(
            "failed to open cache database at {}: {}",
            path.display(),
            e
          ))
        })?
      }
      StoreLocation::Memory => Connection::open_in_memory()
        .map_err(|e| StoreError::Unavailable(format!("failed to open in-memory database: {}", e)))?,
    };

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| StoreError::Unavailable(format!("failed to create cache tables: {}", e)))?;

    self.upgrade(&mut conn)?;
    debug!(database = self.spec.name, "cache database opened");

    Ok(conn)
  }

  /// Declare missing stores and bump the schema version (additive only).
  fn upgrade(&self, conn: &mut Connection) -> StoreResult<()> {
    let current: u32 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| StoreError::Unavailable(format!("failed to read schema version: {}", e)))?;

    if current > self.spec.version {
      return Err(StoreError::Unavailable(format!(
        "database {} is at version {}, newer than supported version {}",
        self.spec.name, current, self.spec.version
      )));
    }
    if current == self.spec.version {
      return Ok(());
    }

    let tx = conn
      .transaction()
      .map_err(|e| StoreError::Unavailable(format!("failed to begin upgrade: {}", e)))?;
    for store in self.spec.stores {
      tx.execute(
        "INSERT OR IGNORE INTO stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| StoreError::Unavailable(format!("failed to declare store {}: {}", store, e)))?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {}", self.spec.version))
      .map_err(|e| StoreError::Unavailable(format!("failed to set schema version: {}", e)))?;
    tx.commit()
      .map_err(|e| StoreError::Unavailable(format!("failed to commit upgrade: {}", e)))?;

    info!(
      database = self.spec.name,
      from = current,
      to = self.spec.version,
      "cache database upgraded"
    );
    Ok(())
  }
}

/// Schema shared by every cache database.
const STORE_SCHEMA: &str = r#"
-- Logical stores declared by the schema versions seen so far
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY
);

-- Records of every logical store (values are encoded envelopes)
CREATE TABLE IF NOT EXISTS records (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key)
);

INSERT OR IGNORE INTO stores (name) VALUES ('_session');
"#;

fn require_store(conn: &Connection, store: &str) -> StoreResult<()> {
  if store_declared(conn, store)? {
    Ok(())
  } else {
    Err(StoreError::MissingStore(store.to_string()))
  }
}

fn store_declared(conn: &Connection, store: &str) -> StoreResult<bool> {
  conn
    .query_row(
      "SELECT 1 FROM stores WHERE name = ?",
      params![store],
      |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| StoreError::Transaction(format!("failed to look up store {}: {}", store, e)))
}

/// Escape LIKE wildcards so a key prefix matches literally.
fn like_prefix(prefix: &str) -> String {
  let mut pattern = String::with_capacity(prefix.len() + 1);
  for c in prefix.chars() {
    if matches!(c, '%' | '_' | '\\') {
      pattern.push('\\');
    }
    pattern.push(c);
  }
  pattern.push('%');
  pattern
}

impl KeyValueStore for SqliteStore {
  fn get(&self, store: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .query_row(
        "SELECT value FROM records WHERE store = ? AND key = ?",
        params![store, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| StoreError::Transaction(format!("failed to read record: {}", e)))
  }

  fn put(&self, store: &str, key: &str, value: &[u8]) -> StoreResult<()> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO records (store, key, value, written_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![store, key, value],
      )
      .map_err(|e| StoreError::Transaction(format!("failed to store record: {}", e)))?;

    Ok(())
  }

  fn put_many(&self, store: &str, entries: &[(String, Vec<u8>)]) -> StoreResult<()> {
    let mut conn = self.connection()?;
    require_store(&conn, store)?;

    // Dropping the transaction without commit rolls every write back
    let tx = conn
      .transaction()
      .map_err(|e| StoreError::Transaction(format!("failed to begin transaction: {}", e)))?;

    for (key, value) in entries {
      tx.execute(
        "INSERT OR REPLACE INTO records (store, key, value, written_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![store, key, value],
      )
      .map_err(|e| StoreError::Transaction(format!("failed to store record {}: {}", key, e)))?;
    }

    tx.commit()
      .map_err(|e| StoreError::Transaction(format!("failed to commit transaction: {}", e)))
  }

  fn delete(&self, store: &str, key: &str) -> StoreResult<()> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .execute(
        "DELETE FROM records WHERE store = ? AND key = ?",
        params![store, key],
      )
      .map_err(|e| StoreError::Transaction(format!("failed to delete record: {}", e)))?;

    Ok(())
  }

  fn clear(&self, stores: &[&str]) -> StoreResult<()> {
    let mut conn = self.connection()?;

    let mut declared = Vec::with_capacity(stores.len());
    for store in stores {
      if store_declared(&conn, store)? {
        declared.push(*store);
      }
    }
    if declared.is_empty() {
      return Ok(());
    }

    let tx = conn
      .transaction()
      .map_err(|e| StoreError::Transaction(format!("failed to begin transaction: {}", e)))?;
    for store in &declared {
      tx.execute("DELETE FROM records WHERE store = ?", params![store])
        .map_err(|e| StoreError::Transaction(format!("failed to clear {}: {}", store, e)))?;
    }
    tx.commit()
      .map_err(|e| StoreError::Transaction(format!("failed to commit clear: {}", e)))?;

    debug!(database = self.spec.name, stores = ?declared, "cache stores cleared");
    Ok(())
  }

  fn count(&self, store: &str) -> StoreResult<u64> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .query_row(
        "SELECT COUNT(*) FROM records WHERE store = ?",
        params![store],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n.max(0) as u64)
      .map_err(|e| StoreError::Transaction(format!("failed to count records: {}", e)))
  }

  fn count_prefix(&self, store: &str, prefix: &str) -> StoreResult<u64> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .query_row(
        "SELECT COUNT(*) FROM records WHERE store = ? AND key LIKE ? ESCAPE '\\'",
        params![store, like_prefix(prefix)],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n.max(0) as u64)
      .map_err(|e| StoreError::Transaction(format!("failed to count records: {}", e)))
  }

  fn contains(&self, store: &str, key: &str) -> StoreResult<bool> {
    let conn = self.connection()?;
    require_store(&conn, store)?;

    conn
      .query_row(
        "SELECT 1 FROM records WHERE store = ? AND key = ?",
        params![store, key],
        |_| Ok(()),
      )
      .optional()
      .map(|found| found.is_some())
      .map_err(|e| StoreError::Transaction(format!("failed to read record: {}", e)))
  }

  fn has_store(&self, store: &str) -> StoreResult<bool> {
    let conn = self.connection()?;
    store_declared(&conn, store)
  }
}
