//! Isolated local parsing.
//!
//! The parser runs off the async runtime in a worker that only talks to the
//! caller through messages. Replies are matched to requests by correlation id.
//! In production the worker is a child process; tests can use an in-process
//! thread instead.

mod capability;
mod client;
mod process;
mod protocol;
mod serve;
#[cfg(test)]
mod thread;

pub use capability::{JsonProjectParser, ProjectParser};
pub use client::{WorkerChannel, WorkerClient, WorkerSpawner, DEFAULT_WORKER_TIMEOUT};
pub use process::{ProcessSpawner, WORKER_COMMAND};
pub use protocol::{
  next_correlation_id, ParseFailure, ParseFailureCode, WorkerReply, WorkerRequest,
};
pub use serve::{run_request, serve, serve_stdio};
#[cfg(test)]
pub use thread::ThreadSpawner;
