//! Log setup for the `sgn` binary.
//!
//! Logs go to a file in the data directory so stdout carries only the JSON
//! output. The filter comes from `SGN_LOG` (e.g. `SGN_LOG=sgn=debug`).

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "SGN_LOG";
const LOG_FILE: &str = "sgn.log";

fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("sgn"))
}

fn filter(verbose: bool) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("sgn=debug,info")
    } else {
      EnvFilter::new("info")
    }
  })
}

/// Install the global subscriber. Keep the returned guard alive until exit or
/// buffered lines are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(verbose))
    .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

