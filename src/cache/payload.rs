//! Write-then-evict cache for heavy per-device and per-project data.
//!
//! Large projects carry tens of thousands of parameter rows. After a parse,
//! device payloads and the two project graphs are persisted and dropped from
//! the in-memory model; detail views fetch them back on demand.
//!
//! The in-memory model is only touched after the write transaction commits, so
//! a failed offload leaves it exactly as it was.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{
  ConfigEntry, Device, DevicePayload, GraphCacheState, GraphCounts, GraphModel, GroupLink,
  Project, ProjectGraphPayload,
};
use crate::store::{
  open_record, DatabaseSpec, Envelope, KeyValueStore, Lookup, Record, SessionGate, SessionId,
  StoreResult,
};

use super::fallback::{DatapointSizing, StandardDatapointSizes};

pub const DEVICE_STORE: &str = "device-payload";
pub const GRAPH_STORE: &str = "project-graphs";

/// Version 1 only had the device store; version 2 added project graphs.
pub const PROJECT_DB: DatabaseSpec = DatabaseSpec {
  name: "project-cache",
  version: 2,
  stores: &[DEVICE_STORE, GRAPH_STORE],
};

const SESSION_FLAG: &str = "project_cache_init";

impl Record for DevicePayload {
  const KIND: &'static str = "device-payload";
  const VERSION: u32 = 1;
}

impl Record for ProjectGraphPayload {
  const KIND: &'static str = "project-graphs";
  const VERSION: u32 = 1;
}

/// Borrowed view of a device's heavy fields, encoded as a [`DevicePayload`].
#[derive(Serialize)]
struct DevicePayloadView<'a> {
  configuration_entries: &'a [ConfigEntry],
  configuration: &'a BTreeMap<String, String>,
  group_links: &'a [GroupLink],
}

impl<'a> From<&'a Device> for DevicePayloadView<'a> {
  fn from(device: &'a Device) -> Self {
    Self {
      configuration_entries: &device.configuration_entries,
      configuration: &device.configuration,
      group_links: &device.group_links,
    }
  }
}

/// Borrowed view of a project's graphs, encoded as a [`ProjectGraphPayload`].
#[derive(Serialize)]
struct ProjectGraphView<'a> {
  topology_graph: Option<&'a GraphModel>,
  group_address_graph: Option<&'a GraphModel>,
}

fn seal_view<R: Record, V: Serialize>(view: V) -> StoreResult<Vec<u8>> {
  Envelope::seal(R::KIND, R::VERSION, view)
}

/// Record key of a device payload; empty parts yield no key.
fn device_record_key(project_key: &str, device_key: &str) -> Option<String> {
  if project_key.is_empty() || device_key.is_empty() {
    None
  } else {
    Some(format!("{}::{}", project_key, device_key))
  }
}

/// What the project cache holds for one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectCacheStats {
  pub device_payload_count: u64,
  pub has_project_graphs: bool,
}

/// Offloads heavy project data to a [`KeyValueStore`] and reads it back.
pub struct ProjectPayloadCache<S: KeyValueStore + ?Sized> {
  store: Arc<S>,
  session: Arc<SessionGate>,
  sizing: Arc<dyn DatapointSizing>,
}

impl<S: KeyValueStore + ?Sized> ProjectPayloadCache<S> {
  pub fn new(store: Arc<S>, session: SessionId) -> Self {
    Self::with_sizing(store, session, Arc::new(StandardDatapointSizes))
  }

  /// Use a custom datapoint size lookup for the fallback map.
  pub fn with_sizing(store: Arc<S>, session: SessionId, sizing: Arc<dyn DatapointSizing>) -> Self {
    Self {
      store,
      session: Arc::new(SessionGate::new(SESSION_FLAG, session)),
      sizing,
    }
  }

  fn ready(&self) -> bool {
    self
      .session
      .ensure(self.store.as_ref(), &[DEVICE_STORE, GRAPH_STORE])
  }

  /// Persist every device's heavy fields in one transaction, then evict them.
  ///
  /// Returns whether anything was offloaded. On failure the project is left
  /// untouched, fallback map included.
  ///
  /// A cache key belongs to the first device that has it. Later devices with
  /// the same key keep their payload in memory.
  pub fn offload_device_payloads(&self, project_key: &str, project: &mut Project) -> bool {
    if project_key.is_empty() {
      return false;
    }

    let mut fallbacks = project.group_address_fallbacks.clone().unwrap_or_default();
    let mut entries = Vec::new();
    let mut candidates = Vec::new();
    let mut claimed = HashSet::new();

    for (index, device) in project.devices.iter().enumerate() {
      let Some(device_key) = device.cache_key() else {
        continue;
      };
      for link in &device.group_links {
        fallbacks.absorb(link, self.sizing.as_ref());
      }
      if !claimed.insert(device_key) {
        if device.has_heavy_payload() {
          warn!(project_key, device_key, "duplicate device key, payload stays in memory");
        }
        continue;
      }
      if !device.has_heavy_payload() {
        continue;
      }
      let Some(key) = device_record_key(project_key, device_key) else {
        continue;
      };

      match seal_view::<DevicePayload, _>(DevicePayloadView::from(device)) {
        Ok(bytes) => {
          entries.push((key, bytes));
          candidates.push(index);
        }
        Err(e) => {
          warn!(project_key, device_key, error = %e, "failed to encode device payload");
          return false;
        }
      }
    }

    if candidates.is_empty() || !self.ready() {
      return false;
    }

    if let Err(e) = self.store.put_many(DEVICE_STORE, &entries) {
      warn!(project_key, error = %e, "device payload offload failed, keeping payloads in memory");
      return false;
    }

    for index in &candidates {
      project.devices[*index].evict_payload();
    }
    if !fallbacks.is_empty() {
      project.group_address_fallbacks = Some(fallbacks);
    }

    info!(project_key, devices = candidates.len(), "device payloads offloaded");
    true
  }

  /// Persist both project graphs as one record, then drop them from memory.
  pub fn offload_project_graphs(&self, project_key: &str, project: &mut Project) -> bool {
    if project_key.is_empty()
      || (project.topology_graph.is_none() && project.group_address_graph.is_none())
    {
      return false;
    }
    if !self.ready() {
      return false;
    }

    match self.store.has_store(GRAPH_STORE) {
      Ok(true) => {}
      Ok(false) => {
        debug!(project_key, "graph store not present in this database version");
        return false;
      }
      Err(e) => {
        debug!(project_key, error = %e, "graph store unavailable");
        return false;
      }
    }

    let view = ProjectGraphView {
      topology_graph: project.topology_graph.as_ref(),
      group_address_graph: project.group_address_graph.as_ref(),
    };
    let result = seal_view::<ProjectGraphPayload, _>(view)
      .and_then(|bytes| self.store.put(GRAPH_STORE, project_key, &bytes));
    if let Err(e) = result {
      warn!(project_key, error = %e, "project graph offload failed, keeping graphs in memory");
      return false;
    }

    let counts = GraphCounts {
      topology: project
        .topology_graph
        .as_ref()
        .map(GraphModel::size)
        .unwrap_or_default(),
      group: project
        .group_address_graph
        .as_ref()
        .map(GraphModel::size)
        .unwrap_or_default(),
    };
    project.graph_state = GraphCacheState {
      cached: true,
      load_failed: false,
      counts: Some(counts),
    };
    project.topology_graph = None;
    project.group_address_graph = None;

    info!(
      project_key,
      topology_nodes = counts.topology.nodes,
      group_nodes = counts.group.nodes,
      "project graphs offloaded"
    );
    true
  }

  pub fn get_device_payload(&self, project_key: &str, device_key: &str) -> Lookup<DevicePayload> {
    let Some(key) = device_record_key(project_key, device_key) else {
      return Lookup::Miss;
    };
    self.read(DEVICE_STORE, &key)
  }

  pub fn get_project_graphs(&self, project_key: &str) -> Lookup<ProjectGraphPayload> {
    if project_key.is_empty() {
      return Lookup::Miss;
    }
    self.read(GRAPH_STORE, project_key)
  }

  fn read<R>(&self, store: &str, key: &str) -> Lookup<R>
  where
    R: Record + serde::de::DeserializeOwned,
  {
    if !self.ready() {
      return Lookup::Unavailable;
    }

    let result = self
      .store
      .get(store, key)
      .and_then(|bytes| bytes.map(|bytes| open_record::<R>(&bytes)).transpose());
    if let Err(e) = &result {
      debug!(store, key, error = %e, "project cache read failed");
    }
    Lookup::from(result)
  }

  /// Store one device payload. Returns whether it was written.
  pub fn set_device_payload(
    &self,
    project_key: &str,
    device_key: &str,
    payload: &DevicePayload,
  ) -> bool {
    let Some(key) = device_record_key(project_key, device_key) else {
      return false;
    };
    if !self.ready() {
      return false;
    }

    let result = seal_view::<DevicePayload, _>(payload)
      .and_then(|bytes| self.store.put(DEVICE_STORE, &key, &bytes));
    match result {
      Ok(()) => true,
      Err(e) => {
        debug!(key, error = %e, "device payload write dropped");
        false
      }
    }
  }

  /// Count of offloaded devices and presence of graphs. Defaults on any failure.
  pub fn project_cache_stats(&self, project_key: &str) -> ProjectCacheStats {
    if project_key.is_empty() || !self.ready() {
      return ProjectCacheStats::default();
    }

    let prefix = format!("{}::", project_key);
    ProjectCacheStats {
      device_payload_count: self
        .store
        .count_prefix(DEVICE_STORE, &prefix)
        .unwrap_or_default(),
      has_project_graphs: self
        .store
        .contains(GRAPH_STORE, project_key)
        .unwrap_or_default(),
    }
  }

  /// Remove every device payload and graph record in one transaction.
  pub fn clear(&self) -> StoreResult<()> {
    self.store.clear(&[DEVICE_STORE, GRAPH_STORE])
  }

  /// Heavy fields of a device for display, from memory or from the store.
  pub fn device_details(&self, project_key: &str, device: &Device) -> Lookup<DevicePayload> {
    if !device.cache_markers.is_cached() {
      return Lookup::Hit(device.payload());
    }
    match device.cache_key() {
      Some(device_key) => self.get_device_payload(project_key, device_key),
      None => Lookup::Miss,
    }
  }

  /// Graphs of a project, fetched from the store when they were offloaded.
  ///
  /// Sets `graph_state.load_failed` when cached graphs cannot be read back.
  pub fn load_project_graphs(
    &self,
    project_key: &str,
    project: &mut Project,
  ) -> Lookup<ProjectGraphPayload> {
    if !project.graphs_cached() {
      return Lookup::Hit(ProjectGraphPayload {
        topology_graph: project.topology_graph.clone(),
        group_address_graph: project.group_address_graph.clone(),
      });
    }

    let lookup = self.get_project_graphs(project_key);
    project.graph_state.load_failed = !lookup.is_hit();
    if project.graph_state.load_failed {
      warn!(project_key, "cached project graphs could not be loaded");
    }
    lookup
  }
}

impl<S: KeyValueStore + ?Sized> Clone for ProjectPayloadCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      session: Arc::clone(&self.session),
      sizing: Arc::clone(&self.sizing),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{GraphEdge, GraphNode};
  use crate::store::{NoopStore, SqliteStore, StoreError};
  use std::sync::atomic::{AtomicBool, Ordering};

  /// SQLite store whose writes can be forced to fail.
  struct FlakyStore {
    inner: SqliteStore,
    fail_writes: AtomicBool,
  }

  impl FlakyStore {
    fn new(spec: DatabaseSpec) -> Self {
      Self {
        inner: SqliteStore::in_memory(spec),
        fail_writes: AtomicBool::new(false),
      }
    }

    fn fail_writes(&self, fail: bool) {
      self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
      if self.fail_writes.load(Ordering::SeqCst) {
        Err(StoreError::Transaction("disk full".to_string()))
      } else {
        Ok(())
      }
    }
  }

  impl KeyValueStore for FlakyStore {
    fn get(&self, store: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
      self.inner.get(store, key)
    }

    fn put(&self, store: &str, key: &str, value: &[u8]) -> StoreResult<()> {
      if store != crate::store::SESSION_STORE {
        self.check()?;
      }
      self.inner.put(store, key, value)
    }

    fn put_many(&self, store: &str, entries: &[(String, Vec<u8>)]) -> StoreResult<()> {
      self.check()?;
      self.inner.put_many(store, entries)
    }

    fn delete(&self, store: &str, key: &str) -> StoreResult<()> {
      self.inner.delete(store, key)
    }

    fn clear(&self, stores: &[&str]) -> StoreResult<()> {
      self.inner.clear(stores)
    }

    fn count(&self, store: &str) -> StoreResult<u64> {
      self.inner.count(store)
    }

    fn count_prefix(&self, store: &str, prefix: &str) -> StoreResult<u64> {
      self.inner.count_prefix(store, prefix)
    }

    fn contains(&self, store: &str, key: &str) -> StoreResult<bool> {
      self.inner.contains(store, key)
    }

    fn has_store(&self, store: &str) -> StoreResult<bool> {
      self.inner.has_store(store)
    }
  }

  fn link(address: &str, dpt: Option<&str>) -> GroupLink {
    GroupLink {
      group_address: address.to_string(),
      object_name: "Switch".to_string(),
      datapoint_type: dpt.map(String::from),
      is_transmitter: true,
      ..Default::default()
    }
  }

  fn graph(nodes: usize) -> GraphModel {
    GraphModel {
      nodes: (0..nodes)
        .map(|i| GraphNode {
          id: format!("n{}", i),
          kind: "device".to_string(),
          label: format!("Node {}", i),
          ..Default::default()
        })
        .collect(),
      edges: vec![GraphEdge {
        id: "e0".to_string(),
        source: "n0".to_string(),
        target: "n1".to_string(),
        ..Default::default()
      }],
    }
  }

  fn project() -> Project {
    Project {
      project_name: "Office".to_string(),
      devices: vec![
        Device {
          individual_address: "1.1.1".to_string(),
          name: "Actuator".to_string(),
          configuration_entries: vec![ConfigEntry {
            name: "Delay".to_string(),
            value: "5s".to_string(),
            ..Default::default()
          }],
          configuration: BTreeMap::from([("channel".to_string(), "A".to_string())]),
          group_links: vec![link("1/0/1", Some("DPST-1-1")), link("1/0/2", None)],
          ..Default::default()
        },
        Device {
          instance_id: "P-01_DI-2".to_string(),
          name: "Sensor".to_string(),
          group_links: vec![link("1/0/2", Some("DPST-9-1"))],
          ..Default::default()
        },
        // Lightweight device: not a candidate
        Device {
          individual_address: "1.1.3".to_string(),
          ..Default::default()
        },
        // No key: skipped entirely
        Device {
          configuration: BTreeMap::from([("x".to_string(), "y".to_string())]),
          ..Default::default()
        },
      ],
      topology_graph: Some(graph(3)),
      group_address_graph: Some(graph(2)),
      ..Default::default()
    }
  }

  fn cache() -> (Arc<FlakyStore>, ProjectPayloadCache<FlakyStore>) {
    let store = Arc::new(FlakyStore::new(PROJECT_DB));
    let cache = ProjectPayloadCache::new(Arc::clone(&store), SessionId::new("test"));
    (store, cache)
  }

  #[test]
  fn test_offload_devices_evicts_after_commit() {
    let (_store, cache) = cache();
    let mut project = project();
    let original = project.clone();

    assert!(cache.offload_device_payloads("p1", &mut project));

    let actuator = &project.devices[0];
    assert!(!actuator.has_heavy_payload());
    assert!(actuator.cache_markers.is_cached());
    assert_eq!(actuator.cache_markers.config_entry_count, 1);
    assert_eq!(actuator.cache_markers.link_count, 2);
    assert!(project.devices[1].cache_markers.is_cached());
    assert!(!project.devices[2].cache_markers.is_cached());
    assert!(project.devices[3].has_heavy_payload());

    assert_eq!(
      cache.get_device_payload("p1", "1.1.1"),
      Lookup::Hit(original.devices[0].payload())
    );
    assert_eq!(
      cache.device_details("p1", &project.devices[1]),
      Lookup::Hit(original.devices[1].payload())
    );
    assert_eq!(cache.project_cache_stats("p1").device_payload_count, 2);
  }

  #[test]
  fn test_offload_devices_builds_fallback_map() {
    let (_store, cache) = cache();
    let mut project = project();

    cache.offload_device_payloads("p1", &mut project);

    let fallbacks = project.group_address_fallbacks.as_ref().unwrap();
    assert_eq!(fallbacks.get("1/0/1").unwrap().object_size, "1 bit");
    // First link had no type; the second device supplied it
    let entry = fallbacks.get("1/0/2").unwrap();
    assert_eq!(entry.datapoint_type, "DPST-9-1");
    assert_eq!(entry.object_size, "2 bytes");
  }

  #[test]
  fn test_failed_device_offload_leaves_project_unchanged() {
    let (store, cache) = cache();
    let mut project = project();
    let before = project.clone();

    store.fail_writes(true);
    assert!(!cache.offload_device_payloads("p1", &mut project));

    assert_eq!(project, before);
    store.fail_writes(false);
    assert_eq!(cache.get_device_payload("p1", "1.1.1"), Lookup::Miss);
  }

  #[test]
  fn test_no_candidates_is_a_noop() {
    let (_store, cache) = cache();
    let mut project = Project {
      devices: vec![Device {
        individual_address: "1.1.1".to_string(),
        ..Default::default()
      }],
      ..Default::default()
    };
    let before = project.clone();

    assert!(!cache.offload_device_payloads("p1", &mut project));
    assert_eq!(project, before);
  }

  #[test]
  fn test_offload_graphs_then_load() {
    let (_store, cache) = cache();
    let mut project = project();
    let original = project.clone();

    assert!(cache.offload_project_graphs("p1", &mut project));
    assert!(project.topology_graph.is_none());
    assert!(project.group_address_graph.is_none());
    assert!(project.graphs_cached());
    let counts = project.graph_state.counts.unwrap();
    assert_eq!(counts.topology.nodes, 3);
    assert_eq!(counts.group.edges, 1);
    assert!(cache.project_cache_stats("p1").has_project_graphs);

    let loaded = cache.load_project_graphs("p1", &mut project).into_option().unwrap();
    assert_eq!(loaded.topology_graph, original.topology_graph);
    assert_eq!(loaded.group_address_graph, original.group_address_graph);
    assert!(!project.graph_state.load_failed);
  }

  #[test]
  fn test_failed_graph_offload_leaves_project_unchanged() {
    let (store, cache) = cache();
    let mut project = project();
    let before = project.clone();

    store.fail_writes(true);
    assert!(!cache.offload_project_graphs("p1", &mut project));
    assert_eq!(project, before);
    assert!(!project.graphs_cached());
  }

  #[test]
  fn test_project_without_graphs_is_not_offloaded() {
    let (_store, cache) = cache();
    let mut project = Project::default();
    assert!(!cache.offload_project_graphs("p1", &mut project));
    assert!(!project.graphs_cached());
  }

  #[test]
  fn test_missing_cached_graphs_flag_load_failure() {
    let (_store, cache) = cache();
    let mut project = project();
    cache.offload_project_graphs("p1", &mut project);
    cache.clear().unwrap();

    assert_eq!(cache.load_project_graphs("p1", &mut project), Lookup::Miss);
    assert!(project.graph_state.load_failed);

    // A fresh offload clears the flag again
    project.topology_graph = Some(graph(2));
    assert!(cache.offload_project_graphs("p1", &mut project));
    assert!(!project.graph_state.load_failed);
  }

  #[test]
  fn test_older_schema_without_graph_store() {
    const PROJECT_DB_V1: DatabaseSpec = DatabaseSpec {
      name: "project-cache",
      version: 1,
      stores: &[DEVICE_STORE],
    };
    let store = Arc::new(SqliteStore::in_memory(PROJECT_DB_V1));
    let cache = ProjectPayloadCache::new(store, SessionId::new("test"));
    let mut project = project();

    assert_eq!(cache.get_project_graphs("p1"), Lookup::Miss);
    assert!(!cache.offload_project_graphs("p1", &mut project));
    assert!(project.topology_graph.is_some());
    assert!(cache.offload_device_payloads("p1", &mut project));
    assert_eq!(
      cache.project_cache_stats("p1"),
      ProjectCacheStats {
        device_payload_count: 2,
        has_project_graphs: false,
      }
    );
  }

  #[test]
  fn test_stats_count_only_this_project() {
    let (_store, cache) = cache();
    let payload = DevicePayload::default();
    assert!(cache.set_device_payload("p1", "1.1.1", &payload));
    assert!(cache.set_device_payload("p10", "1.1.1", &payload));
    assert!(!cache.set_device_payload("", "1.1.1", &payload));

    assert_eq!(cache.project_cache_stats("p1").device_payload_count, 1);
    assert_eq!(cache.project_cache_stats("missing"), ProjectCacheStats::default());
  }

  #[test]
  fn test_duplicate_device_key_keeps_later_payload_in_memory() {
    let (_store, cache) = cache();
    let device = |who: &str| Device {
      individual_address: "1.1.1".to_string(),
      configuration: BTreeMap::from([("who".to_string(), who.to_string())]),
      ..Default::default()
    };
    let mut project = Project {
      project_name: "Twins".to_string(),
      devices: vec![device("first"), device("second")],
      ..Default::default()
    };
    let original = project.clone();

    assert!(cache.offload_device_payloads("p1", &mut project));
    assert!(project.devices[0].cache_markers.is_cached());
    assert!(!project.devices[1].cache_markers.is_cached());
    assert_eq!(project.devices[1], original.devices[1]);

    assert_eq!(
      cache.device_details("p1", &project.devices[0]),
      Lookup::Hit(original.devices[0].payload())
    );
    assert_eq!(
      cache.device_details("p1", &project.devices[1]),
      Lookup::Hit(original.devices[1].payload())
    );

    // A second pass must not let the later device take over the record
    assert!(!cache.offload_device_payloads("p1", &mut project));
    assert_eq!(
      cache.device_details("p1", &project.devices[0]),
      Lookup::Hit(original.devices[0].payload())
    );
    assert_eq!(cache.project_cache_stats("p1").device_payload_count, 1);
  }

  #[test]
  fn test_device_details_from_memory_when_not_cached() {
    let (_store, cache) = cache();
    let project = project();
    assert_eq!(
      cache.device_details("p1", &project.devices[0]),
      Lookup::Hit(project.devices[0].payload())
    );
  }

  #[test]
  fn test_unavailable_storage_never_mutates() {
    let cache = ProjectPayloadCache::new(Arc::new(NoopStore), SessionId::generate());
    let mut project = project();
    let before = project.clone();

    assert!(!cache.offload_device_payloads("p1", &mut project));
    assert!(!cache.offload_project_graphs("p1", &mut project));
    assert_eq!(project, before);
    assert_eq!(cache.get_device_payload("p1", "1.1.1"), Lookup::Unavailable);
    assert_eq!(cache.project_cache_stats("p1"), ProjectCacheStats::default());
    assert!(cache.clear().is_err());
  }
}
