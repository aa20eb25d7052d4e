//! HTTP transport for the upload endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use url::Url;

use crate::error::ApiError;
use crate::model::ProjectFile;

/// Fields of the multipart upload body.
#[derive(Debug, Clone, Copy)]
pub struct UploadForm<'a> {
  pub file: &'a ProjectFile,
  pub password: Option<&'a str>,
  pub product_language: Option<&'a str>,
}

/// Raw response of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  /// Canonical reason phrase of the status, if known
  pub reason: String,
  pub body: String,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Sends one upload attempt. Transport failures are [`ApiError::Network`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn post_upload(&self, url: &Url, form: &UploadForm<'_>) -> Result<HttpResponse, ApiError>;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, ApiError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("knxload/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self { client })
  }

  fn build_form(form: &UploadForm<'_>) -> Form {
    let file = Part::bytes(form.file.to_buffer()).file_name(form.file.name().to_string());
    let mut body = Form::new().part("file", file);
    if let Some(password) = form.password.filter(|p| !p.is_empty()) {
      body = body.text("password", password.to_string());
    }
    if let Some(language) = form.product_language.filter(|l| !l.is_empty()) {
      body = body.text("product_language", language.to_string());
    }
    body
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn post_upload(&self, url: &Url, form: &UploadForm<'_>) -> Result<HttpResponse, ApiError> {
    let response = self
      .client
      .post(url.clone())
      .multipart(Self::build_form(form))
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| ApiError::Network(format!("Failed to read response body: {}", e)))?;

    Ok(HttpResponse {
      status: status.as_u16(),
      reason: status.canonical_reason().unwrap_or_default().to_string(),
      body,
    })
  }
}
