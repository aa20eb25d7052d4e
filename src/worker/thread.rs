//! In-process worker for tests that need a real parser but no child process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::WorkerError;

use super::capability::ProjectParser;
use super::client::{WorkerChannel, WorkerSpawner};
use super::protocol::WorkerRequest;
use super::serve::run_request;

/// Runs the parser on a dedicated OS thread per worker.
///
/// A thread cannot be killed; termination raises a flag so a late result is
/// discarded instead of delivered.
pub struct ThreadSpawner<P: ProjectParser> {
  parser: Arc<P>,
}

impl<P: ProjectParser> ThreadSpawner<P> {
  pub fn new(parser: P) -> Self {
    Self {
      parser: Arc::new(parser),
    }
  }
}

impl<P: ProjectParser> WorkerSpawner for ThreadSpawner<P> {
  fn spawn(&self) -> Result<WorkerChannel, WorkerError> {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let terminated = Arc::new(AtomicBool::new(false));

    let parser = Arc::clone(&self.parser);
    let flag = Arc::clone(&terminated);
    std::thread::Builder::new()
      .name("knxload-parse".to_string())
      .spawn(move || {
        let Some(request) = request_rx.blocking_recv() else {
          return;
        };
        if flag.load(Ordering::SeqCst) {
          return;
        }
        let reply = run_request(&*parser, request);
        if !flag.load(Ordering::SeqCst) {
          let _ = reply_tx.send(reply);
        }
      })
      .map_err(|e| WorkerError::Unavailable(format!("failed to start parse thread: {}", e)))?;

    Ok(WorkerChannel::new(request_tx, reply_rx, move || {
      terminated.store(true, Ordering::SeqCst);
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Project;
  use crate::worker::{JsonProjectParser, ParseFailure, ParseFailureCode, WorkerClient};

  #[tokio::test]
  async fn test_thread_worker_parses() {
    let client = WorkerClient::new(ThreadSpawner::new(JsonProjectParser));

    let project = client
      .parse(br#"{"projectName": "Home"}"#.to_vec(), None, Some("de-DE"))
      .await
      .unwrap();
    assert_eq!(project.project_name, "Home");

    let err = client.parse(b"PK\x03\x04".to_vec(), None, None).await.unwrap_err();
    assert!(matches!(
      err,
      WorkerError::Failed(ParseFailure {
        code: Some(ParseFailureCode::UnsupportedFormat),
        ..
      })
    ));
  }

  struct PanickingParser;

  impl ProjectParser for PanickingParser {
    fn parse(&self, _: &[u8], _: Option<&str>, _: Option<&str>) -> Result<Project, ParseFailure> {
      panic!("parser bug");
    }
  }

  #[tokio::test]
  async fn test_thread_worker_panic_reports_message() {
    let client = WorkerClient::new(ThreadSpawner::new(PanickingParser));

    let err = client.parse(Vec::new(), None, None).await.unwrap_err();
    match err {
      WorkerError::Failed(failure) => assert!(failure.message.contains("parser bug")),
      other => panic!("expected a failure reply, got {:?}", other),
    }
  }
}
