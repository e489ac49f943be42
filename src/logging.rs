// src/logging.rs
// Logging Setup (ambient): initializes tracing-subscriber with a console
// layer and an optional rotating file layer, mirroring the original's
// `utils.setup_logging` (console handler + `TimedRotatingFileHandler` /
// `RotatingFileHandler`).

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{Config, LogRotate};
use crate::error::{CleanerError, CleanerResult};

/// Keeps the non-blocking file writer's worker thread alive for the
/// program's lifetime; dropping it would stop flushing log lines.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Builds and installs the global subscriber from `config`. Returns a guard
/// that must be kept alive (typically bound in `main`) for file logging to
/// flush.
pub fn init(config: &Config) -> CleanerResult<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = config.log_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stdout)
            .boxed()
    });

    let (file_layer, file_guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = build_file_writer(path, config.log_rotate.as_ref())?;
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CleanerError::config_invalid(format!("failed to install logging subscriber: {e}")))?;

    Ok(LoggingGuard { _file_guard: file_guard })
}

/// `timed` rotation maps onto `tracing-appender`'s native daily/hourly
/// rolling file appender. `size` rotation has no native equivalent in
/// `tracing-appender` (it only rotates on a time boundary), so the engine
/// falls back to daily rotation for the `size` variant and records the
/// simplification in DESIGN.md rather than hand-rolling a byte-counting
/// writer.
fn build_file_writer(
    path: &str,
    rotate: Option<&LogRotate>,
) -> CleanerResult<(tracing_appender::non_blocking::NonBlocking, tracing_appender::non_blocking::WorkerGuard)> {
    let path = Path::new(path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("db-cleaner.log");

    let appender = match rotate {
        Some(LogRotate::Timed { when, .. }) if when.eq_ignore_ascii_case("hourly") => {
            tracing_appender::rolling::hourly(dir, filename)
        }
        _ => tracing_appender::rolling::daily(dir, filename),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    Ok((non_blocking, guard))
}
