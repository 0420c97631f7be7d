//! Tracing subscriber setup for the `sbox` binary.

use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,sbox=debug";

/// Install the global subscriber.
///
/// `log_level` wins over `RUST_LOG`; with neither set the filter is
/// `info,sbox=debug`. Output goes to stderr so it never mixes with command
/// output such as `ps -q`. When `log_file` is given, events are also appended
/// there without ANSI colours.
///
/// ```no_run
/// use sbox::utils::logger::init_logger;
///
/// init_logger(Some("warn"), None).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = build_filter(log_level)?;

    // stderr only: stdout belongs to `ps`, `logs` and foreground commands.
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_target(true)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    // A `None` layer is a no-op, so one registry covers both cases.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("logger initialized");
    Ok(())
}

/// Flag value, then `RUST_LOG`, then the built-in default.
fn build_filter(log_level: Option<&str>) -> Result<EnvFilter> {
    Ok(match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    })
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Append so several runs share one diagnostics file.
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
