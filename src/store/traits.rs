//! Core traits and types for the key/value persistence layer.

pub use crate::error::StoreError;

/// Result of a storage operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a cache read.
///
/// Keeps "nothing stored under this key" apart from "the cache could not be
/// consulted", while still letting callers collapse both with [`Lookup::into_option`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
  /// The record was found and decoded
  Hit(T),
  /// No usable record under this key
  Miss,
  /// Storage is unavailable or the read failed
  Unavailable,
}

impl<T> Lookup<T> {
  pub fn into_option(self) -> Option<T> {
    match self {
      Lookup::Hit(value) => Some(value),
      Lookup::Miss | Lookup::Unavailable => None,
    }
  }

  pub fn is_hit(&self) -> bool {
    matches!(self, Lookup::Hit(_))
  }

  pub fn is_unavailable(&self) -> bool {
    matches!(self, Lookup::Unavailable)
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
    match self {
      Lookup::Hit(value) => Lookup::Hit(f(value)),
      Lookup::Miss => Lookup::Miss,
      Lookup::Unavailable => Lookup::Unavailable,
    }
  }
}

impl<T> From<StoreResult<Option<T>>> for Lookup<T> {
  /// A store the schema never declared, or a record in an unknown format,
  /// cannot hold the value: both read as a miss.
  fn from(result: StoreResult<Option<T>>) -> Self {
    match result {
      Ok(Some(value)) => Lookup::Hit(value),
      Ok(None) => Lookup::Miss,
      Err(StoreError::MissingStore(_)) | Err(StoreError::Codec(_)) => Lookup::Miss,
      Err(StoreError::Unavailable(_)) | Err(StoreError::Transaction(_)) => Lookup::Unavailable,
    }
  }
}

/// Versioned, multi-store transactional key/value engine.
///
/// Values are opaque bytes; see [`super::Envelope`] for the record format the
/// caches use on top of it.
pub trait KeyValueStore: Send + Sync {
  /// Read one value.
  fn get(&self, store: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

  /// Write one value, replacing any previous one.
  fn put(&self, store: &str, key: &str, value: &[u8]) -> StoreResult<()>;

  /// Write several values in a single transaction; nothing is written on failure.
  fn put_many(&self, store: &str, entries: &[(String, Vec<u8>)]) -> StoreResult<()>;

  /// Remove one value.
  fn delete(&self, store: &str, key: &str) -> StoreResult<()>;

  /// Remove every value of the given stores in a single transaction.
  /// Stores unknown to the schema are skipped.
  fn clear(&self, stores: &[&str]) -> StoreResult<()>;

  /// Number of values in a store.
  fn count(&self, store: &str) -> StoreResult<u64>;

  /// Number of values whose key starts with `prefix`.
  fn count_prefix(&self, store: &str, prefix: &str) -> StoreResult<u64>;

  /// Whether a value exists under `key`.
  fn contains(&self, store: &str, key: &str) -> StoreResult<bool>;

  /// Whether the schema declares `store`.
  fn has_store(&self, store: &str) -> StoreResult<bool>;
}

/// Storage that is always unavailable.
/// Used when caching is disabled - every read misses and every write is refused.
pub struct NoopStore;

fn disabled<T>() -> StoreResult<T> {
  Err(StoreError::Unavailable("caching is disabled".to_string()))
}

impl KeyValueStore for NoopStore {
  fn get(&self, _store: &str, _key: &str) -> StoreResult<Option<Vec<u8>>> {
    disabled()
  }

  fn put(&self, _store: &str, _key: &str, _value: &[u8]) -> StoreResult<()> {
    disabled()
  }

  fn put_many(&self, _store: &str, _entries: &[(String, Vec<u8>)]) -> StoreResult<()> {
    disabled()
  }

  fn delete(&self, _store: &str, _key: &str) -> StoreResult<()> {
    disabled()
  }

  fn clear(&self, _stores: &[&str]) -> StoreResult<()> {
    disabled()
  }

  fn count(&self, _store: &str) -> StoreResult<u64> {
    disabled()
  }

  fn count_prefix(&self, _store: &str, _prefix: &str) -> StoreResult<u64> {
    disabled()
  }

  fn contains(&self, _store: &str, _key: &str) -> StoreResult<bool> {
    disabled()
  }

  fn has_store(&self, _store: &str) -> StoreResult<bool> {
    disabled()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lookup_from_store_result() {
    assert_eq!(Lookup::from(Ok(Some(1))), Lookup::Hit(1));
    assert_eq!(Lookup::<i32>::from(Ok(None)), Lookup::Miss);
    assert_eq!(
      Lookup::<i32>::from(Err(StoreError::MissingStore("graphs".into()))),
      Lookup::Miss
    );
    assert_eq!(
      Lookup::<i32>::from(Err(StoreError::Unavailable("closed".into()))),
      Lookup::Unavailable
    );
  }

  #[test]
  fn test_lookup_into_option_collapses_miss_and_unavailable() {
    assert_eq!(Lookup::Hit("x").into_option(), Some("x"));
    assert_eq!(Lookup::<&str>::Miss.into_option(), None);
    assert_eq!(Lookup::<&str>::Unavailable.into_option(), None);
  }

  #[test]
  fn test_noop_store_is_unavailable() {
    let store = NoopStore;
    assert!(matches!(
      store.get("layouts", "k"),
      Err(StoreError::Unavailable(_))
    ));
    assert!(store.put("layouts", "k", b"v").is_err());
    assert!(store.clear(&["layouts"]).is_err());
  }
}
