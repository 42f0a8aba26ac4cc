//! Tracing setup: stderr plus a daily-rolling log file in the data directory.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides the level derived from `verbosity`. The returned
/// guard flushes the file writer on drop and must live until exit.
pub fn init(verbosity: u8, log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "owner-sync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(build_env_filter(verbosity))
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn level_for(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  }
}

/// Build an `EnvFilter` from the verbosity, respecting `RUST_LOG`.
fn build_env_filter(verbosity: u8) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    // External crates stay at warn level to reduce noise
    EnvFilter::new(format!("warn,owner_sync={}", level_for(verbosity)))
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_verbosity_levels() {
    assert_eq!(level_for(0), "warn");
    assert_eq!(level_for(1), "info");
    assert_eq!(level_for(2), "debug");
    assert_eq!(level_for(9), "trace");
  }
}
