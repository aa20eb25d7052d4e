//! Caches sitting downstream of a successful parse or layout computation.
//!
//! Both caches are built on a [`KeyValueStore`](crate::store::KeyValueStore):
//! - [`LayoutCache`] keeps precomputed diagram layouts per fingerprint
//! - [`ProjectPayloadCache`] moves heavy device and graph data out of memory
//!   and fetches it back on demand
//!
//! Cache failures never escape these types except through `clear()`.

mod fallback;
mod layout;
mod payload;

pub use fallback::{DatapointSizing, FallbackEntry, GroupAddressFallbackMap, StandardDatapointSizes};
pub use layout::{fingerprint, LayoutCache, LAYOUT_DB, LAYOUT_STORE};
pub use payload::{
  ProjectCacheStats, ProjectPayloadCache, DEVICE_STORE, GRAPH_STORE, PROJECT_DB,
};
