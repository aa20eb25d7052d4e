//! Error types for storage, parsing and upload.
//!
//! Storage errors stay inside the cache boundary; parse and upload errors
//! propagate to the caller for user-facing messaging.

use std::time::Duration;
use thiserror::Error;

use crate::worker::ParseFailure;

/// Failures of the persistent key/value engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  /// The database could not be opened (or was disabled); memoized per store
  #[error("storage unavailable: {0}")]
  Unavailable(String),

  /// The logical store was never declared by the database schema
  #[error("store '{0}' does not exist in this database version")]
  MissingStore(String),

  /// A read or write transaction failed and was rolled back
  #[error("transaction failed: {0}")]
  Transaction(String),

  /// A record could not be encoded or did not match the expected envelope
  #[error("record codec error: {0}")]
  Codec(String),
}

/// Failures of the remote upload call.
#[derive(Error, Debug)]
pub enum ApiError {
  /// Transport-level failure, including the client-side attempt timeout
  #[error("network error: {0}")]
  Network(String),

  /// Non-2xx response; the body text (or reason phrase) is the message
  #[error("upload failed ({status}): {message}")]
  Status { status: u16, message: String },

  /// 2xx response whose body is not a usable project payload
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  /// Every attempt failed with a retryable error
  #[error("upload failed after {attempts} attempts: {last}")]
  Exhausted { attempts: u32, last: Box<ApiError> },
}

impl ApiError {
  /// Create a Status error.
  pub fn status(status: u16, message: impl Into<String>) -> Self {
    Self::Status {
      status,
      message: message.into(),
    }
  }

  /// Create an InvalidResponse error.
  pub fn invalid_response(message: impl Into<String>) -> Self {
    Self::InvalidResponse(message.into())
  }

  /// Transport failures and 5xx responses are worth another attempt.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Network(_) => true,
      Self::Status { status, .. } => (500..600).contains(status),
      Self::InvalidResponse(_) | Self::Exhausted { .. } => false,
    }
  }

  /// HTTP status carried by this error, if any.
  pub fn http_status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      Self::Exhausted { last, .. } => last.http_status(),
      _ => None,
    }
  }
}

/// Failures of a single isolated worker call.
#[derive(Error, Debug)]
pub enum WorkerError {
  /// The worker replied with a structured parse failure
  #[error("{0}")]
  Failed(ParseFailure),

  /// No matching reply arrived in time; the worker was terminated
  #[error("parse worker timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  /// The worker went away without replying
  #[error("parse worker failed: {0}")]
  Crashed(String),

  /// A worker could not be started at all
  #[error("parse worker unavailable: {0}")]
  Unavailable(String),
}

impl WorkerError {
  /// Whether this failure means the project needs a (different) password.
  ///
  /// A structured code from the parser wins; otherwise the message is matched.
  pub fn is_password_error(&self) -> bool {
    match self {
      Self::Failed(failure) => failure.is_password_error(),
      other => is_password_message(&other.to_string()),
    }
  }
}

/// Failures of the parsing pipeline as a whole.
#[derive(Error, Debug)]
pub enum ParseError {
  /// Wrong or missing credential; never retried and never sent to the server
  #[error("password required or invalid: {0}")]
  PasswordRequired(String),

  /// Local parse failed and no fallback was attempted
  #[error("local parse failed: {0}")]
  Local(#[from] WorkerError),

  /// Local parse failed and the server fallback failed too
  #[error(transparent)]
  Upload(#[from] ApiError),
}

impl ParseError {
  /// Whether the user should be prompted for a password.
  pub fn needs_password(&self) -> bool {
    match self {
      Self::PasswordRequired(_) => true,
      Self::Local(err) => err.is_password_error(),
      Self::Upload(err) => is_password_message(&err.to_string()),
    }
  }
}

/// Case-insensitive match for password/encryption failures in parser messages.
pub fn is_password_message(message: &str) -> bool {
  let lower = message.to_lowercase();
  lower.contains("password") || lower.contains("encrypted")
}
