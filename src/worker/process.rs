//! Parse workers backed by a child process.
//!
//! The child is the `knxload` executable itself, started with the hidden
//! `worker` command. It has its own address space, and terminating the
//! channel kills it.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::WorkerError;

use super::client::{WorkerChannel, WorkerSpawner};
use super::protocol::{WorkerReply, WorkerRequest};

/// Name of the hidden CLI command that serves one parse request.
pub const WORKER_COMMAND: &str = "worker";

/// Starts one child process per worker.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
  program: PathBuf,
  args: Vec<String>,
}

impl ProcessSpawner {
  /// Re-run the current executable as a worker.
  pub fn current_exe() -> Result<Self, WorkerError> {
    let program = std::env::current_exe()
      .map_err(|e| WorkerError::Unavailable(format!("failed to locate worker executable: {}", e)))?;
    Ok(Self::with_command(program, [WORKER_COMMAND]))
  }

  pub fn with_command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      program: program.into(),
      args: args.into_iter().map(Into::into).collect(),
    }
  }
}

impl WorkerSpawner for ProcessSpawner {
  fn spawn(&self) -> Result<WorkerChannel, WorkerError> {
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| {
        WorkerError::Unavailable(format!(
          "failed to start worker process {}: {}",
          self.program.display(),
          e
        ))
      })?;

    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      return Err(WorkerError::Unavailable(
        "worker process pipes were not captured".to_string(),
      ));
    };
    let pid = child.id();
    debug!(pid, "worker process started");

    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<WorkerReply>();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    // Request: one line, then close stdin
    tokio::spawn(async move {
      let Some(request) = request_rx.recv().await else {
        return;
      };
      let mut line = match serde_json::to_vec(&request) {
        Ok(line) => line,
        Err(e) => {
          debug!(pid, error = %e, "failed to encode worker request");
          return;
        }
      };
      line.push(b'\n');
      if let Err(e) = stdin.write_all(&line).await {
        debug!(pid, error = %e, "failed to write worker request");
      }
    });

    // Replies: one JSON line each; EOF closes the channel
    tokio::spawn(async move {
      let mut lines = BufReader::new(stdout).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => match serde_json::from_str::<WorkerReply>(&line) {
            Ok(reply) => {
              if reply_tx.send(reply).is_err() {
                break;
              }
            }
            Err(e) => debug!(pid, error = %e, "ignoring malformed worker output"),
          },
          Ok(None) => break,
          Err(e) => {
            debug!(pid, error = %e, "failed to read worker output");
            break;
          }
        }
      }
    });

    // Owns the child until it exits or is killed, and reaps it
    tokio::spawn(async move {
      tokio::select! {
        _ = kill_rx => match child.kill().await {
          Ok(()) => debug!(pid, "worker process killed"),
          Err(e) => debug!(pid, error = %e, "failed to kill worker process"),
        },
        status = child.wait() => debug!(pid, status = ?status, "worker process exited"),
      }
    });

    Ok(WorkerChannel::new(request_tx, reply_rx, move || {
      let _ = kill_tx.send(());
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::WorkerClient;
  use std::time::Duration;

  #[tokio::test]
  async fn test_missing_executable_is_unavailable() {
    let client = WorkerClient::new(ProcessSpawner::with_command(
      "/nonexistent/knxload-worker",
      Vec::<String>::new(),
    ));

    let err = client.parse(b"{}".to_vec(), None, None).await.unwrap_err();
    assert!(matches!(err, WorkerError::Unavailable(_)));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_exit_without_reply_is_crash() {
    let client = WorkerClient::new(ProcessSpawner::with_command("sh", ["-c", "exit 3"]));

    let err = client.parse(b"{}".to_vec(), None, None).await.unwrap_err();
    assert!(matches!(err, WorkerError::Crashed(_)));
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_hanging_worker_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("worker.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
    let client = WorkerClient::new(ProcessSpawner::with_command("sh", ["-c", script.as_str()]))
      .with_timeout(Duration::from_secs(1));

    let err = client.parse(b"{}".to_vec(), None, None).await.unwrap_err();
    assert!(matches!(err, WorkerError::Timeout(_)));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let proc_entry = PathBuf::from(format!("/proc/{}", pid.trim()));
    for _ in 0..100 {
      if !proc_entry.exists() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("worker process {} still alive after timeout", pid.trim());
  }
}
