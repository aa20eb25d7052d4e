//! Upload client with per-attempt timeout, retry and exponential backoff.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::model::{Project, ProjectFile};

use super::transport::{HttpTransport, ReqwestTransport, UploadForm};
use super::types::decode_project;

const UPLOAD_PATH: &str = "api/upload";
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 10_000;

/// Per-call overrides of the client defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
  /// Total attempts; 0 counts as 1
  pub max_retries: Option<u32>,
  /// Timeout of each attempt
  pub timeout: Option<Duration>,
}

/// Delay before the attempt following attempt number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
  let ms = 2u64
    .checked_pow(attempt)
    .and_then(|factor| factor.checked_mul(BACKOFF_BASE_MS))
    .map_or(BACKOFF_CAP_MS, |ms| ms.min(BACKOFF_CAP_MS));
  Duration::from_millis(ms)
}

/// Something that can turn a project file into a [`Project`] remotely.
#[async_trait]
pub trait ProjectUploader: Send + Sync {
  async fn upload(
    &self,
    file: &ProjectFile,
    password: Option<&str>,
    preferred_language: Option<&str>,
  ) -> Result<Project, ApiError>;
}

/// Client of the remote parse service.
pub struct ApiClient<T: HttpTransport = ReqwestTransport> {
  transport: Arc<T>,
  upload_url: Url,
  default_timeout: Duration,
  default_retries: u32,
}

impl ApiClient<ReqwestTransport> {
  pub fn new(config: &ServerConfig) -> Result<Self> {
    let transport = ReqwestTransport::new().map_err(|e| eyre!("{}", e))?;
    Self::with_transport(transport, config)
  }
}

impl<T: HttpTransport> ApiClient<T> {
  pub fn with_transport(transport: T, config: &ServerConfig) -> Result<Self> {
    let mut base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid server URL {}: {}", config.base_url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    let upload_url = base
      .join(UPLOAD_PATH)
      .map_err(|e| eyre!("Invalid server URL {}: {}", config.base_url, e))?;

    Ok(Self {
      transport: Arc::new(transport),
      upload_url,
      default_timeout: config.timeout(),
      default_retries: config.max_retries,
    })
  }

  pub fn upload_url(&self) -> &Url {
    &self.upload_url
  }

  /// Upload a project file and decode the parsed project.
  ///
  /// Network failures (including an attempt timing out) and 5xx responses
  /// are retried with backoff. 4xx responses and unusable bodies fail at once.
  pub async fn upload_project(
    &self,
    file: &ProjectFile,
    password: Option<&str>,
    preferred_language: Option<&str>,
    options: UploadOptions,
  ) -> Result<Project, ApiError> {
    let max_retries = options.max_retries.unwrap_or(self.default_retries).max(1);
    let timeout = options.timeout.unwrap_or(self.default_timeout);
    let form = UploadForm {
      file,
      password,
      product_language: preferred_language,
    };

    let mut attempt = 1;
    loop {
      debug!(attempt, file = file.name(), bytes = file.len(), "uploading project");
      let error = match self.attempt(&form, timeout).await {
        Ok(project) => {
          info!(attempt, project = %project.project_name, "project parsed by server");
          return Ok(project);
        }
        Err(e) => e,
      };

      if !error.is_retryable() {
        return Err(error);
      }
      if attempt >= max_retries {
        warn!(attempts = attempt, error = %error, "upload retries exhausted");
        return Err(ApiError::Exhausted {
          attempts: attempt,
          last: Box::new(error),
        });
      }

      let delay = backoff_delay(attempt);
      warn!(
        attempt,
        max_retries,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "upload attempt failed, retrying"
      );
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }

  async fn attempt(&self, form: &UploadForm<'_>, timeout: Duration) -> Result<Project, ApiError> {
    let response = tokio::time::timeout(timeout, self.transport.post_upload(&self.upload_url, form))
      .await
      .map_err(|_| ApiError::Network(format!("request timed out after {}ms", timeout.as_millis())))??;

    if !response.is_success() {
      let message = if response.body.is_empty() {
        response.reason
      } else {
        response.body
      };
      return Err(ApiError::status(response.status, message));
    }

    decode_project(&response.body)
  }
}

#[async_trait]
impl<T: HttpTransport> ProjectUploader for ApiClient<T> {
  async fn upload(
    &self,
    file: &ProjectFile,
    password: Option<&str>,
    preferred_language: Option<&str>,
  ) -> Result<Project, ApiError> {
    self
      .upload_project(file, password, preferred_language, UploadOptions::default())
      .await
  }
}
