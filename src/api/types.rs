//! Validation of the upload response body.

use serde_json::Value;

use crate::error::ApiError;
use crate::model::Project;

const REQUIRED_GRAPHS: [&str; 2] = ["group_address_graph", "topology_graph"];

/// Decode a 2xx body into a [`Project`].
///
/// The body must be a JSON object with a project name (`project_name` or
/// `projectName`) and both graph payloads.
pub fn decode_project(body: &str) -> Result<Project, ApiError> {
  let value: Value = serde_json::from_str(body)
    .map_err(|e| ApiError::invalid_response(format!("response is not JSON: {}", e)))?;

  let Some(object) = value.as_object() else {
    return Err(ApiError::invalid_response("response is not a JSON object"));
  };

  let has_name = ["project_name", "projectName"]
    .iter()
    .any(|field| object.get(*field).is_some_and(is_truthy));
  if !has_name {
    return Err(ApiError::invalid_response("response has no project name"));
  }

  for field in REQUIRED_GRAPHS {
    if object.get(field).map_or(true, Value::is_null) {
      return Err(ApiError::invalid_response(format!("response has no {}", field)));
    }
  }

  serde_json::from_value(value)
    .map_err(|e| ApiError::invalid_response(format!("Failed to decode project: {}", e)))
}

fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::String(s) => !s.is_empty(),
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::Array(_) | Value::Object(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_valid_body() {
    let body = r#"{
      "projectName": "Office",
      "topology_graph": {"nodes": [{"id": "a"}], "edges": []},
      "group_address_graph": {"nodes": [], "edges": []},
      "devices": []
    }"#;
    let project = decode_project(body).unwrap();
    assert_eq!(project.project_name, "Office");
    assert_eq!(project.topology_graph.unwrap().nodes.len(), 1);
  }

  #[test]
  fn test_missing_fields_are_invalid() {
    for body in [
      "[]",
      "not json",
      r#"{"topology_graph": {}, "group_address_graph": {}}"#,
      r#"{"project_name": "", "topology_graph": {}, "group_address_graph": {}}"#,
      r#"{"project_name": "x", "group_address_graph": {}}"#,
      r#"{"project_name": "x", "topology_graph": {}, "group_address_graph": null}"#,
    ] {
      assert!(
        matches!(decode_project(body), Err(ApiError::InvalidResponse(_))),
        "{}",
        body
      );
    }
  }
}
