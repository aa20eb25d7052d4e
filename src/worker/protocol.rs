//! Messages exchanged with an isolated parse worker.
//!
//! A process worker receives one request and answers with one reply, each a
//! single JSON line:
//!
//! ```text
//! {"id":"parse-..","buffer":"<hex>","password":null,"preferred_language":"de-DE"}
//! {"id":"parse-..","ok":true,"result":{..project..}}
//! {"id":"parse-..","ok":false,"error":{"message":"..","stack":".."}}
//! ```

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::is_password_message;
use crate::model::Project;

/// A parse request. The buffer is moved into the worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
  pub id: String,
  #[serde(with = "hex_buffer")]
  pub buffer: Vec<u8>,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default)]
  pub preferred_language: Option<String>,
}

/// The single reply a worker sends for a request.
#[derive(Debug, Deserialize)]
#[serde(try_from = "ReplyLine")]
pub struct WorkerReply {
  pub id: String,
  pub outcome: Result<Box<Project>, ParseFailure>,
}

impl WorkerReply {
  pub fn success(id: impl Into<String>, project: Project) -> Self {
    Self {
      id: id.into(),
      outcome: Ok(Box::new(project)),
    }
  }

  pub fn failure(id: impl Into<String>, failure: ParseFailure) -> Self {
    Self {
      id: id.into(),
      outcome: Err(failure),
    }
  }
}

impl Serialize for WorkerReply {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let (result, error) = match &self.outcome {
      Ok(project) => (Some(project.as_ref()), None),
      Err(failure) => (None, Some(failure)),
    };
    ReplyLineRef {
      id: &self.id,
      ok: self.outcome.is_ok(),
      result,
      error,
    }
    .serialize(serializer)
  }
}

#[derive(Serialize)]
struct ReplyLineRef<'a> {
  id: &'a str,
  ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  result: Option<&'a Project>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<&'a ParseFailure>,
}

#[derive(Deserialize)]
struct ReplyLine {
  id: String,
  ok: bool,
  #[serde(default)]
  result: Option<Box<Project>>,
  #[serde(default)]
  error: Option<ParseFailure>,
}

impl TryFrom<ReplyLine> for WorkerReply {
  type Error = String;

  fn try_from(line: ReplyLine) -> Result<Self, Self::Error> {
    let outcome = match (line.ok, line.result, line.error) {
      (true, Some(project), _) => Ok(project),
      (false, _, Some(error)) => Err(error),
      (true, None, _) => return Err(format!("reply {} is ok but has no result", line.id)),
      (false, _, None) => return Err(format!("reply {} failed without an error", line.id)),
    };
    Ok(Self {
      id: line.id,
      outcome,
    })
  }
}

/// Hex text for the request buffer, so a request stays one JSON line.
mod hex_buffer {
  use serde::{de, Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    hex::decode(text).map_err(de::Error::custom)
  }
}

/// Machine-readable reason of a parse failure, when the parser knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureCode {
  PasswordRequired,
  UnsupportedFormat,
  Malformed,
}

/// Structured error reported by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<ParseFailureCode>,
}

impl ParseFailure {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      stack: None,
      code: None,
    }
  }

  pub fn with_code(mut self, code: ParseFailureCode) -> Self {
    self.code = Some(code);
    self
  }

  pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
    self.stack = Some(stack.into());
    self
  }

  /// Structured code first, message heuristic otherwise.
  pub fn is_password_error(&self) -> bool {
    match self.code {
      Some(code) => code == ParseFailureCode::PasswordRequired,
      None => is_password_message(&self.message),
    }
  }
}

impl fmt::Display for ParseFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

impl std::error::Error for ParseFailure {}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh correlation id of the form `parse-<unix-millis>-<counter>`.
pub fn next_correlation_id() -> String {
  let counter = NEXT_ID.fetch_add(1, Ordering::Relaxed);
  format!("parse-{}-{}", chrono::Utc::now().timestamp_millis(), counter)
}
