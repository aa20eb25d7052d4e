//! Local-first project parsing with optional server fallback.
//!
//! ```text
//! local parse ──ok──> project
//!     │
//!     ├─ password problem ──> PasswordRequired (never retried)
//!     ├─ fallback disabled ──> Local error
//!     └─ other failure ──> server upload ──> project | Upload error
//! ```

use tracing::{info, warn};

use crate::api::ProjectUploader;
use crate::error::ParseError;
use crate::model::{Project, ProjectFile};
use crate::worker::{WorkerClient, WorkerSpawner};

/// Per-call parsing options.
#[derive(Debug, Clone)]
pub struct ParseOptions {
  pub allow_server_fallback: bool,
  pub preferred_language: Option<String>,
}

impl Default for ParseOptions {
  fn default() -> Self {
    Self {
      allow_server_fallback: true,
      preferred_language: None,
    }
  }
}

pub struct ParsingPipeline<W: WorkerSpawner, U: ProjectUploader> {
  worker: WorkerClient<W>,
  uploader: U,
}

impl<W: WorkerSpawner, U: ProjectUploader> ParsingPipeline<W, U> {
  pub fn new(worker: WorkerClient<W>, uploader: U) -> Self {
    Self { worker, uploader }
  }

  /// Parse a project file, locally first.
  pub async fn parse_project(
    &self,
    file: &ProjectFile,
    password: Option<&str>,
    options: &ParseOptions,
  ) -> Result<Project, ParseError> {
    let language = options.preferred_language.as_deref();

    let local_error = match self.worker.parse(file.to_buffer(), password, language).await {
      Ok(project) => {
        info!(file = file.name(), project = %project.project_name, "project parsed locally");
        return Ok(project);
      }
      Err(e) => e,
    };

    // Another transport cannot fix a wrong credential
    if local_error.is_password_error() {
      return Err(ParseError::PasswordRequired(local_error.to_string()));
    }
    if !options.allow_server_fallback {
      return Err(ParseError::Local(local_error));
    }

    warn!(file = file.name(), error = %local_error, "local parse failed, falling back to server");
    let project = self.uploader.upload(file, password, language).await?;
    Ok(project)
  }
}
