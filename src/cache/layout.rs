//! Cache of precomputed diagram layouts keyed by caller-supplied fingerprints.

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::store::{
  DatabaseSpec, Envelope, KeyValueStore, Lookup, SessionGate, SessionId, StoreResult,
};

pub const LAYOUT_STORE: &str = "layouts";

pub const LAYOUT_DB: DatabaseSpec = DatabaseSpec {
  name: "layout-cache",
  version: 1,
  stores: &[LAYOUT_STORE],
};

const SESSION_FLAG: &str = "layout_cache_init";
const LAYOUT_KIND: &str = "layout";
const LAYOUT_VERSION: u32 = 1;

/// Stable fixed-length key summarizing the inputs of a cached computation.
///
/// Parts are separated so that `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint<I, P>(parts: I) -> String
where
  I: IntoIterator<Item = P>,
  P: AsRef<str>,
{
  let mut hasher = Sha256::new();
  for part in parts {
    hasher.update(part.as_ref().as_bytes());
    hasher.update([0u8]);
  }
  hex::encode(hasher.finalize())
}

/// Layout blobs, invalidated once per session.
///
/// Reads never fail: a miss, a decoding problem or unavailable storage all
/// come back as a [`Lookup`]. Writes are best effort.
pub struct LayoutCache<S: KeyValueStore + ?Sized> {
  store: Arc<S>,
  session: Arc<SessionGate>,
}

impl<S: KeyValueStore + ?Sized> LayoutCache<S> {
  pub fn new(store: Arc<S>, session: SessionId) -> Self {
    Self {
      store,
      session: Arc::new(SessionGate::new(SESSION_FLAG, session)),
    }
  }

  fn ready(&self) -> bool {
    self.session.ensure(self.store.as_ref(), &[LAYOUT_STORE])
  }

  /// Look up a layout.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
    if key.is_empty() {
      return Lookup::Miss;
    }
    if !self.ready() {
      return Lookup::Unavailable;
    }

    let result = self
      .store
      .get(LAYOUT_STORE, key)
      .and_then(|bytes| {
        bytes
          .map(|bytes| Envelope::open(&bytes, LAYOUT_KIND, LAYOUT_VERSION))
          .transpose()
      });
    if let Err(e) = &result {
      debug!(key, error = %e, "layout cache read failed");
    }
    Lookup::from(result)
  }

  /// Store a layout. Failures are logged and otherwise ignored.
  pub fn set<T: Serialize>(&self, key: &str, value: &T) {
    if key.is_empty() || !self.ready() {
      return;
    }

    let result = Envelope::seal(LAYOUT_KIND, LAYOUT_VERSION, value)
      .and_then(|bytes| self.store.put(LAYOUT_STORE, key, &bytes));
    if let Err(e) = result {
      debug!(key, error = %e, "layout cache write dropped");
    }
  }

  /// Remove every layout. Unlike reads and writes, failure is reported.
  pub fn clear(&self) -> StoreResult<()> {
    self.store.clear(&[LAYOUT_STORE])
  }
}

impl<S: KeyValueStore + ?Sized> Clone for LayoutCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      session: Arc::clone(&self.session),
    }
  }
}
