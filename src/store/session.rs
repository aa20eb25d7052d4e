//! Session-scoped invalidation of cache databases.
//!
//! Cached records are only trusted within the session that wrote them. The
//! first use of a cache in a new session wipes its stores and records the
//! session id, so records computed by an older session or build are never read.

use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::sqlite::SESSION_STORE;
use super::traits::KeyValueStore;

/// Identity of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// A session unique to this process.
  pub fn generate() -> Self {
    Self(uuid::Uuid::new_v4().to_string())
  }

  /// A session shared by every process of this build.
  pub fn for_build() -> Self {
    Self(format!("build-{}", env!("CARGO_PKG_VERSION")))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Init-once guard comparing the persisted session flag with the current session.
pub struct SessionGate {
  flag: &'static str,
  session: SessionId,
  ready: OnceLock<bool>,
}

impl SessionGate {
  pub fn new(flag: &'static str, session: SessionId) -> Self {
    Self {
      flag,
      session,
      ready: OnceLock::new(),
    }
  }

  /// Run session invalidation on first call; later calls return the memoized outcome.
  ///
  /// Returns whether the cache may be used. A cache whose stale records could
  /// not be cleared, or whose storage is unavailable, stays unusable.
  pub fn ensure<S: KeyValueStore + ?Sized>(&self, store: &S, stores: &[&str]) -> bool {
    *self.ready.get_or_init(|| self.check(store, stores))
  }

  fn check<S: KeyValueStore + ?Sized>(&self, store: &S, stores: &[&str]) -> bool {
    let current = self.session.as_str().as_bytes();

    match store.get(SESSION_STORE, self.flag) {
      Ok(Some(persisted)) if persisted == current => {
        debug!(flag = self.flag, "cache session already initialized");
        true
      }
      Ok(_) => match store.clear(stores) {
        Ok(()) => {
          if let Err(e) = store.put(SESSION_STORE, self.flag, current) {
            warn!(flag = self.flag, error = %e, "failed to persist cache session flag");
          }
          info!(flag = self.flag, session = self.session.as_str(), "cache invalidated for new session");
          true
        }
        Err(e) => {
          warn!(flag = self.flag, error = %e, "failed to clear stale cache, disabling it");
          false
        }
      },
      Err(e) => {
        debug!(flag = self.flag, error = %e, "cache storage unavailable");
        false
      }
    }
  }
}
