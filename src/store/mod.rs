//! Persistent key/value storage underlying the caches.
//!
//! This module provides a cache-agnostic storage engine that:
//! - Opens its database lazily, at most once per handle
//! - Declares logical stores per schema version and upgrades additively
//! - Commits multi-record writes and clears in a single transaction
//! - Wraps every value in a versioned envelope
//! - Invalidates records left behind by a previous session

mod envelope;
mod session;
mod sqlite;
mod traits;

pub use envelope::{open_record, seal_record, Envelope, Record};
pub use session::{SessionGate, SessionId};
pub use sqlite::{DatabaseSpec, SqliteStore, StoreLocation, SESSION_STORE};
pub use traits::{KeyValueStore, Lookup, NoopStore, StoreError, StoreResult};
