//! Worker side of the parse protocol.
//!
//! Runs inside the child process started by [`ProcessSpawner`](super::ProcessSpawner):
//! one request line on stdin, one reply line on stdout, then exit.

use std::any::Any;
use std::backtrace::Backtrace;
use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use tracing::warn;

use super::capability::ProjectParser;
use super::protocol::{ParseFailure, WorkerReply, WorkerRequest};

static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

/// Parse one request. A panicking parser yields a failure reply.
pub fn run_request<P: ProjectParser + ?Sized>(parser: &P, request: WorkerRequest) -> WorkerReply {
  let WorkerRequest {
    id,
    buffer,
    password,
    preferred_language,
  } = request;

  let outcome = catch_unwind(AssertUnwindSafe(|| {
    parser.parse(&buffer, password.as_deref(), preferred_language.as_deref())
  }));

  match outcome {
    Ok(Ok(project)) => WorkerReply::success(id, project),
    Ok(Err(failure)) => WorkerReply::failure(id, failure),
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      warn!(id, panic = %message, "parser panicked");
      let mut failure = ParseFailure::new(format!("parser panicked: {}", message));
      if let Some(report) = take_panic_report() {
        failure = failure.with_stack(report);
      }
      WorkerReply::failure(id, failure)
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

/// Keep the location and backtrace of the next panic for the failure reply.
fn record_panics() {
  std::panic::set_hook(Box::new(|info| {
    let report = format!("{}\n{}", info, Backtrace::force_capture());
    if let Ok(mut slot) = LAST_PANIC.lock() {
      *slot = Some(report);
    }
  }));
}

fn take_panic_report() -> Option<String> {
  LAST_PANIC.lock().ok().and_then(|mut slot| slot.take())
}

/// Read one request line from `input` and write its reply line to `output`.
pub fn serve<P, R, W>(parser: &P, mut input: R, mut output: W) -> io::Result<()>
where
  P: ProjectParser + ?Sized,
  R: BufRead,
  W: Write,
{
  let mut line = String::new();
  input.read_line(&mut line)?;
  let request: WorkerRequest = serde_json::from_str(&line)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

  let reply = run_request(parser, request);
  serde_json::to_writer(&mut output, &reply)?;
  output.write_all(b"\n")?;
  output.flush()
}

/// Entry point of the hidden `worker` command.
pub fn serve_stdio<P: ProjectParser + ?Sized>(parser: &P) -> io::Result<()> {
  record_panics();
  let stdin = io::stdin();
  let stdout = io::stdout();
  serve(parser, stdin.lock(), stdout.lock())
}
