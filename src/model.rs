//! In-memory project model produced by parsing a project file.
//!
//! Heavy per-device fields (`configuration_entries`, `configuration`,
//! `group_links`) and the two project graphs can be moved to the project cache.
//! The cache markers on [`Device`] and [`Project`] record when that happened and
//! are never serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cache::GroupAddressFallbackMap;

/// Decoded topology and group-address model of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
  #[serde(default, alias = "projectName")]
  pub project_name: String,
  #[serde(default)]
  pub devices: Vec<Device>,
  #[serde(default)]
  pub topology_graph: Option<GraphModel>,
  #[serde(default)]
  pub group_address_graph: Option<GraphModel>,
  /// Areas, lines, locations, group addresses: passed through untouched
  #[serde(flatten)]
  pub extra: Map<String, Value>,

  #[serde(skip)]
  pub graph_state: GraphCacheState,
  /// Datapoint type/size per group address, kept after link eviction
  #[serde(skip)]
  pub group_address_fallbacks: Option<GroupAddressFallbackMap>,
}

impl Project {
  /// Whether graphs must be fetched from the project cache before rendering.
  pub fn graphs_cached(&self) -> bool {
    self.graph_state.cached
  }
}

/// A device with its heavy configuration and link payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
  #[serde(default)]
  pub instance_id: String,
  #[serde(default)]
  pub individual_address: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub configuration_entries: Vec<ConfigEntry>,
  #[serde(default)]
  pub configuration: BTreeMap<String, String>,
  #[serde(default)]
  pub group_links: Vec<GroupLink>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,

  #[serde(skip)]
  pub cache_markers: DeviceCacheMarkers,
}

impl Device {
  /// Key of this device within its project: individual address, else instance id.
  pub fn cache_key(&self) -> Option<&str> {
    [self.individual_address.as_str(), self.instance_id.as_str()]
      .into_iter()
      .find(|key| !key.is_empty())
  }

  /// Whether any heavy field still holds data in memory.
  pub fn has_heavy_payload(&self) -> bool {
    !self.configuration_entries.is_empty()
      || !self.configuration.is_empty()
      || !self.group_links.is_empty()
  }

  /// Copy of the heavy fields as currently held in memory.
  pub fn payload(&self) -> DevicePayload {
    DevicePayload {
      configuration_entries: self.configuration_entries.clone(),
      configuration: self.configuration.clone(),
      group_links: self.group_links.clone(),
    }
  }

  /// Replace heavy fields with empty values and record what was moved out.
  pub(crate) fn evict_payload(&mut self) {
    self.cache_markers = DeviceCacheMarkers {
      config_entry_count: self.configuration_entries.len(),
      config_cached: true,
      link_count: self.group_links.len(),
      links_cached: true,
    };
    self.configuration_entries = Vec::new();
    self.configuration = BTreeMap::new();
    self.group_links = Vec::new();
  }
}

/// Markers left on a device after its payload was offloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCacheMarkers {
  pub config_entry_count: usize,
  pub config_cached: bool,
  pub link_count: usize,
  pub links_cached: bool,
}

impl DeviceCacheMarkers {
  /// Single source of truth for "rehydrate from the store before rendering".
  pub fn is_cached(&self) -> bool {
    self.config_cached || self.links_cached
  }
}

/// One parameter row of a device configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
  pub name: String,
  #[serde(default)]
  pub value: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ref_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Link between a device's group object and a group address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupLink {
  #[serde(default)]
  pub group_address: String,
  #[serde(default)]
  pub object_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub datapoint_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub object_size: Option<String>,
  #[serde(default)]
  pub is_transmitter: bool,
  #[serde(default)]
  pub is_receiver: bool,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Graph model for visualization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
  #[serde(default)]
  pub nodes: Vec<GraphNode>,
  #[serde(default)]
  pub edges: Vec<GraphEdge>,
}

impl GraphModel {
  pub fn size(&self) -> GraphSize {
    GraphSize {
      nodes: self.nodes.len(),
      edges: self.edges.len(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
  pub id: String,
  #[serde(default)]
  pub kind: String,
  #[serde(default)]
  pub label: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
  pub id: String,
  pub source: String,
  pub target: String,
  #[serde(default)]
  pub kind: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, String>,
}

/// Node/edge count of one graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphSize {
  pub nodes: usize,
  pub edges: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
  pub topology: GraphSize,
  pub group: GraphSize,
}

/// Graph offload state of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCacheState {
  pub cached: bool,
  pub load_failed: bool,
  pub counts: Option<GraphCounts>,
}

/// Heavy per-device data as stored under `projectKey::deviceKey`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePayload {
  #[serde(default)]
  pub configuration_entries: Vec<ConfigEntry>,
  #[serde(default)]
  pub configuration: BTreeMap<String, String>,
  #[serde(default)]
  pub group_links: Vec<GroupLink>,
}

/// The two large graph structures of a project, stored under `projectKey`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectGraphPayload {
  pub topology_graph: Option<GraphModel>,
  pub group_address_graph: Option<GraphModel>,
}

/// An uploaded project file.
///
/// Contents are shared; each consumer takes its own buffer via [`ProjectFile::to_buffer`].
#[derive(Debug, Clone)]
pub struct ProjectFile {
  name: String,
  contents: Arc<[u8]>,
}

impl ProjectFile {
  pub fn new(name: impl Into<String>, contents: impl Into<Arc<[u8]>>) -> Self {
    Self {
      name: name.into(),
      contents: contents.into(),
    }
  }

  /// Read a project file from disk.
  pub async fn read(path: &Path) -> std::io::Result<Self> {
    let contents = tokio::fs::read(path).await?;
    let name = path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("project.knxproj")
      .to_string();
    Ok(Self::new(name, contents))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn contents(&self) -> &[u8] {
    &self.contents
  }

  pub fn len(&self) -> usize {
    self.contents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.contents.is_empty()
  }

  /// Fresh owned buffer, ready to be moved into a worker.
  pub fn to_buffer(&self) -> Vec<u8> {
    self.contents.to_vec()
  }

  /// SHA-256 of the contents, hex encoded.
  pub fn content_hash(&self) -> String {
    hex::encode(Sha256::digest(&*self.contents))
  }
}
