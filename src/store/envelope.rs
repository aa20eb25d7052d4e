//! Versioned record envelope for values crossing the storage boundary.
//!
//! Every cached value is stored as JSON of the form
//! `{"kind": "...", "version": N, "data": ...}`. Readers reject records of
//! another kind or version instead of guessing at their layout.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::traits::{StoreError, StoreResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
  pub kind: String,
  pub version: u32,
  pub data: T,
}

impl<T: Serialize> Envelope<T> {
  /// Wrap and encode a value.
  pub fn seal(kind: &str, version: u32, data: T) -> StoreResult<Vec<u8>> {
    let envelope = Envelope {
      kind: kind.to_string(),
      version,
      data,
    };
    serde_json::to_vec(&envelope)
      .map_err(|e| StoreError::Codec(format!("failed to encode {} record: {}", kind, e)))
  }
}

impl<T: DeserializeOwned> Envelope<T> {
  /// Decode a value, checking kind and version first.
  pub fn open(bytes: &[u8], kind: &str, version: u32) -> StoreResult<T> {
    let envelope: Envelope<Value> = serde_json::from_slice(bytes)
      .map_err(|e| StoreError::Codec(format!("record is not an envelope: {}", e)))?;

    if envelope.kind != kind {
      return Err(StoreError::Codec(format!(
        "expected {} record, found {}",
        kind, envelope.kind
      )));
    }
    if envelope.version != version {
      return Err(StoreError::Codec(format!(
        "{} record version {} is not supported (expected {})",
        kind, envelope.version, version
      )));
    }

    serde_json::from_value(envelope.data)
      .map_err(|e| StoreError::Codec(format!("failed to decode {} record: {}", kind, e)))
  }
}

/// A value type with a fixed envelope kind and version.
pub trait Record: Sized {
  const KIND: &'static str;
  const VERSION: u32;
}

/// Encode a typed record.
pub fn seal_record<R: Record + Serialize>(value: &R) -> StoreResult<Vec<u8>> {
  Envelope::seal(R::KIND, R::VERSION, value)
}

/// Decode a typed record.
pub fn open_record<R: Record + DeserializeOwned>(bytes: &[u8]) -> StoreResult<R> {
  Envelope::open(bytes, R::KIND, R::VERSION)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Sample {
    name: String,
  }

  impl Record for Sample {
    const KIND: &'static str = "sample";
    const VERSION: u32 = 2;
  }

  #[test]
  fn test_sealed_record_carries_kind_and_version() {
    let bytes = seal_record(&Sample { name: "a".into() }).unwrap();
    let raw: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(raw["kind"], "sample");
    assert_eq!(raw["version"], 2);
    assert_eq!(raw["data"]["name"], "a");
    assert_eq!(
      open_record::<Sample>(&bytes).unwrap(),
      Sample { name: "a".into() }
    );
  }

  #[test]
  fn test_version_mismatch_is_rejected() {
    let bytes = Envelope::seal("sample", 1, serde_json::json!({"name": "old"})).unwrap();
    let err = open_record::<Sample>(&bytes).unwrap_err();
    assert!(matches!(err, StoreError::Codec(msg) if msg.contains("version 1")));
  }

  #[test]
  fn test_kind_mismatch_and_bare_values_are_rejected() {
    let bytes = Envelope::seal("other", 2, serde_json::json!({"name": "x"})).unwrap();
    assert!(open_record::<Sample>(&bytes).is_err());

    // Schemaless blobs from before the envelope existed
    assert!(open_record::<Sample>(br#"{"name": "x"}"#).is_err());
  }
}
