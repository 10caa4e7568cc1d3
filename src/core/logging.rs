//! Structured logging
//!
//! `tracing-subscriber` registry with an `EnvFilter` and one `fmt` layer,
//! JSON or text, written through a non-blocking stdout or daily-rotated file.
//! `RUST_LOG` replaces the configured directives entirely when set.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Holds the background writer guard; logs are flushed when dropped
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    /// Install the global subscriber. Call once, before anything logs.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(default_directives(&config.level)?)
                .context("Failed to build log filter")?,
        };

        let (writer, guard) = build_writer(config)?;

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(false)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_ansi(config.output == "stdout")
                .boxed(),
            other => anyhow::bail!("Unknown log format '{}'", other),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .context("A global tracing subscriber is already installed")?;

        Ok(Self { _guard: guard })
    }
}

/// Directives for this crate at `level`; HTTP plumbing never goes below debug
fn default_directives(level: &str) -> Result<String> {
    let level = Level::from_str(level).map_err(|_| anyhow::anyhow!("Unknown log level '{}'", level))?;
    let plumbing = if level > Level::DEBUG { Level::DEBUG } else { level };

    Ok(format!(
        "{level},danmu_aggregator={level},tower_http={plumbing},hyper=warn,reqwest=warn",
        level = level.as_str().to_lowercase(),
        plumbing = plumbing.as_str().to_lowercase(),
    ))
}

fn build_writer(config: &LoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    match config.output.as_str() {
        "stdout" => Ok(tracing_appender::non_blocking(std::io::stdout())),
        "file" => {
            let path = config
                .log_file
                .as_deref()
                .context("logging.log_file is required when output is 'file'")?;
            let (directory, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            Ok(tracing_appender::non_blocking(appender))
        }
        other => anyhow::bail!("Unknown log output '{}'", other),
    }
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log path {} has no file name", path.display()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((directory, file_name))
}
