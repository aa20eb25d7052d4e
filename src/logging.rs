use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "KNXLOAD_LOG";

/// Install the global subscriber: a daily rolling file in `log_dir`, and
/// stderr as well when `verbose`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the program.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("knxload")
    .filename_suffix("log")
    .build(log_dir)
    .map_err(|e| eyre!("Failed to create log file in {}: {}", log_dir.display(), e))?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
