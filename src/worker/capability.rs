//! The parsing capability invoked inside a worker.

use crate::model::Project;

use super::protocol::{ParseFailure, ParseFailureCode};

/// Turns project file bytes into a [`Project`].
///
/// Implementations run inside an isolated worker and must not touch shared
/// state.
pub trait ProjectParser: Send + Sync + 'static {
  fn parse(
    &self,
    bytes: &[u8],
    password: Option<&str>,
    preferred_language: Option<&str>,
  ) -> Result<Project, ParseFailure>;
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Reads JSON project exports.
///
/// Raw project archives are reported as unsupported so callers can hand them
/// to the server instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProjectParser;

impl ProjectParser for JsonProjectParser {
  fn parse(
    &self,
    bytes: &[u8],
    _password: Option<&str>,
    _preferred_language: Option<&str>,
  ) -> Result<Project, ParseFailure> {
    if bytes.starts_with(ZIP_MAGIC) {
      return Err(
        ParseFailure::new("project archives cannot be parsed locally")
          .with_code(ParseFailureCode::UnsupportedFormat),
      );
    }

    let project: Project = serde_json::from_slice(bytes).map_err(|e| {
      ParseFailure::new(format!("Failed to parse project export: {}", e))
        .with_code(ParseFailureCode::Malformed)
    })?;

    if project.project_name.is_empty() {
      return Err(
        ParseFailure::new("project export has no project name")
          .with_code(ParseFailureCode::Malformed),
      );
    }
    Ok(project)
  }
}
