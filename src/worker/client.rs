//! One-shot isolated workers and the client that drives them.
//!
//! Each call gets a fresh worker, a fresh correlation id and its own timeout.
//! The worker is terminated on every way out of the call.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::model::Project;

use super::protocol::{next_correlation_id, WorkerReply, WorkerRequest};

pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Message channel to a single worker instance.
pub struct WorkerChannel {
  pub requests: mpsc::UnboundedSender<WorkerRequest>,
  pub replies: mpsc::UnboundedReceiver<WorkerReply>,
  terminate: Option<Box<dyn FnOnce() + Send>>,
}

impl WorkerChannel {
  pub fn new(
    requests: mpsc::UnboundedSender<WorkerRequest>,
    replies: mpsc::UnboundedReceiver<WorkerReply>,
    terminate: impl FnOnce() + Send + 'static,
  ) -> Self {
    Self {
      requests,
      replies,
      terminate: Some(Box::new(terminate)),
    }
  }

  /// Stop the worker. Idempotent.
  pub fn terminate(&mut self) {
    if let Some(terminate) = self.terminate.take() {
      terminate();
    }
    self.replies.close();
  }
}

impl Drop for WorkerChannel {
  fn drop(&mut self) {
    self.terminate();
  }
}

/// Starts one worker per call.
pub trait WorkerSpawner: Send + Sync {
  fn spawn(&self) -> Result<WorkerChannel, WorkerError>;
}

impl<T: WorkerSpawner + ?Sized> WorkerSpawner for Arc<T> {
  fn spawn(&self) -> Result<WorkerChannel, WorkerError> {
    (**self).spawn()
  }
}

/// Sends one parse request per worker and waits for its reply.
pub struct WorkerClient<W: WorkerSpawner> {
  spawner: W,
  timeout: Duration,
}

impl<W: WorkerSpawner> WorkerClient<W> {
  pub fn new(spawner: W) -> Self {
    Self {
      spawner,
      timeout: DEFAULT_WORKER_TIMEOUT,
    }
  }

  /// A zero timeout means the default.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = if timeout.is_zero() {
      DEFAULT_WORKER_TIMEOUT
    } else {
      timeout
    };
    self
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Parse `buffer` in a fresh worker. The buffer is moved into the worker.
  pub async fn parse(
    &self,
    buffer: Vec<u8>,
    password: Option<&str>,
    preferred_language: Option<&str>,
  ) -> Result<Project, WorkerError> {
    let id = next_correlation_id();
    let mut channel = self.spawner.spawn()?;
    debug!(id, bytes = buffer.len(), "parse worker started");

    let request = WorkerRequest {
      id: id.clone(),
      buffer,
      password: password.map(String::from),
      preferred_language: preferred_language.map(String::from),
    };

    let result = if channel.requests.send(request).is_err() {
      Err(WorkerError::Crashed(
        "worker stopped before receiving the request".to_string(),
      ))
    } else {
      match tokio::time::timeout(self.timeout, wait_for_reply(&mut channel.replies, &id)).await {
        Ok(result) => result,
        Err(_) => {
          warn!(id, timeout_ms = self.timeout.as_millis() as u64, "parse worker timed out");
          Err(WorkerError::Timeout(self.timeout))
        }
      }
    };

    channel.terminate();
    result
  }
}

/// First reply carrying `id`; replies for other requests are skipped.
async fn wait_for_reply(
  replies: &mut mpsc::UnboundedReceiver<WorkerReply>,
  id: &str,
) -> Result<Project, WorkerError> {
  while let Some(reply) = replies.recv().await {
    if reply.id != id {
      debug!(expected = id, received = %reply.id, "ignoring reply for another request");
      continue;
    }
    return reply
      .outcome
      .map(|project| *project)
      .map_err(WorkerError::Failed);
  }
  Err(WorkerError::Crashed("worker exited without replying".to_string()))
}
