//! Group-address fallback map and datapoint sizing.
//!
//! When group links are evicted from memory, views still need the datapoint
//! type and object size per group address. The fallback map keeps that summary.

use std::collections::BTreeMap;

use crate::model::GroupLink;

/// Best-known datapoint type and object size of a group address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackEntry {
  pub datapoint_type: String,
  pub object_size: String,
}

/// Group address -> [`FallbackEntry`], built while offloading device links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupAddressFallbackMap {
  entries: BTreeMap<String, FallbackEntry>,
}

impl GroupAddressFallbackMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, group_address: &str) -> Option<&FallbackEntry> {
    self.entries.get(group_address)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &FallbackEntry)> {
    self.entries.iter()
  }

  /// Fold one link into the map.
  ///
  /// The first non-empty datapoint type and object size win. A size still
  /// missing is derived from the link's datapoint type.
  pub fn absorb(&mut self, link: &GroupLink, sizing: &dyn DatapointSizing) {
    if link.group_address.is_empty() {
      return;
    }
    let entry = self.entries.entry(link.group_address.clone()).or_default();

    let datapoint_type = link.datapoint_type.as_deref().unwrap_or("").trim();
    let object_size = link.object_size.as_deref().unwrap_or("").trim();

    if entry.datapoint_type.is_empty() && !datapoint_type.is_empty() {
      entry.datapoint_type = datapoint_type.to_string();
    }
    if entry.object_size.is_empty() && !object_size.is_empty() {
      entry.object_size = object_size.to_string();
    }
    if entry.object_size.is_empty() && !datapoint_type.is_empty() {
      if let Some(size) = sizing.object_size(datapoint_type) {
        entry.object_size = size;
      }
    }
  }
}

/// Lookup of the object size implied by a datapoint type.
pub trait DatapointSizing: Send + Sync {
  fn object_size(&self, datapoint_type: &str) -> Option<String>;
}

/// Object sizes of the standard KNX datapoint main types.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDatapointSizes;

impl DatapointSizing for StandardDatapointSizes {
  fn object_size(&self, datapoint_type: &str) -> Option<String> {
    let size = match main_number(datapoint_type)? {
      1 => "1 bit",
      2 => "2 bits",
      3 => "4 bits",
      4..=6 | 17 | 18 | 20 | 21 | 23 | 25 | 26 => "1 byte",
      7..=9 | 22 | 207 | 217 | 234 | 237 | 244 | 246 => "2 bytes",
      10 | 11 | 30 | 206 | 225 | 232 | 238 | 240 | 250 | 254 => "3 bytes",
      12..=15 | 27 | 219 | 221 | 231 | 235 | 241 | 245 | 249 => "4 bytes",
      16 => "14 bytes",
      19 | 29 => "8 bytes",
      24 => "variable",
      _ => return None,
    };
    Some(size.to_string())
  }
}

/// Main number of a datapoint type in `DPST-9-1`, `DPT-9`, `9.001` or `9` form.
///
/// Only the first of several space-separated types is considered.
fn main_number(datapoint_type: &str) -> Option<u32> {
  let first = datapoint_type.split_whitespace().next()?;
  let upper = first.to_ascii_uppercase();
  let rest = upper
    .strip_prefix("DPST-")
    .or_else(|| upper.strip_prefix("DPT-"))
    .unwrap_or(&upper);
  let number = rest.split(['-', '.']).next()?;
  number.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn link(address: &str, dpt: Option<&str>, size: Option<&str>) -> GroupLink {
    GroupLink {
      group_address: address.to_string(),
      datapoint_type: dpt.map(String::from),
      object_size: size.map(String::from),
      ..Default::default()
    }
  }

  #[test]
  fn test_main_number_forms() {
    assert_eq!(main_number("DPST-1-1"), Some(1));
    assert_eq!(main_number("DPT-9"), Some(9));
    assert_eq!(main_number("9.001"), Some(9));
    assert_eq!(main_number("dpst-5-1 DPST-5-4"), Some(5));
    assert_eq!(main_number("14"), Some(14));
    assert_eq!(main_number(""), None);
    assert_eq!(main_number("switch"), None);
  }

  #[test]
  fn test_standard_sizes() {
    let sizes = StandardDatapointSizes;
    assert_eq!(sizes.object_size("DPST-1-1").as_deref(), Some("1 bit"));
    assert_eq!(sizes.object_size("DPST-5-1").as_deref(), Some("1 byte"));
    assert_eq!(sizes.object_size("DPT-9").as_deref(), Some("2 bytes"));
    assert_eq!(sizes.object_size("DPST-16-0").as_deref(), Some("14 bytes"));
    assert_eq!(sizes.object_size("DPST-999-1"), None);
  }

  #[test]
  fn test_first_non_empty_values_win() {
    let mut map = GroupAddressFallbackMap::new();
    map.absorb(&link("1/1/1", None, None), &StandardDatapointSizes);
    map.absorb(&link("1/1/1", Some("DPST-1-1"), Some("1 bit")), &StandardDatapointSizes);
    map.absorb(&link("1/1/1", Some("DPST-5-1"), Some("1 byte")), &StandardDatapointSizes);

    let entry = map.get("1/1/1").unwrap();
    assert_eq!(entry.datapoint_type, "DPST-1-1");
    assert_eq!(entry.object_size, "1 bit");
  }

  #[test]
  fn test_size_derived_from_datapoint_type() {
    let mut map = GroupAddressFallbackMap::new();
    map.absorb(&link("2/0/1", Some("DPST-9-1"), None), &StandardDatapointSizes);

    assert_eq!(map.get("2/0/1").unwrap().object_size, "2 bytes");
  }

  #[test]
  fn test_links_without_address_are_ignored() {
    let mut map = GroupAddressFallbackMap::new();
    map.absorb(&link("", Some("DPST-1-1"), None), &StandardDatapointSizes);
    assert!(map.is_empty());
  }
}
