//! Tracing/logging setup (§7 ambient stack), mirroring the teacher's
//! `logging.rs`: a rolling file appender plus an optional stdout layer,
//! JSON or text, driven by `RUST_LOG` when set. The core itself never
//! force-installs a subscriber (§9 Design Note "no global-only logger") —
//! this is only used by the crate's own binary and test/bin harnesses.

use crate::config::{LogConfig, LogRotation};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global tracing subscriber per `config` and returns the
/// `WorkerGuard` that must be held for the process lifetime to keep the
/// non-blocking file writer flushing.
pub fn init_logging(config: &LogConfig) -> WorkerGuard {
    let file_appender = match config.rotation {
        LogRotation::Hourly => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        LogRotation::Daily => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        LogRotation::Never => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter_str = if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},ingest=off", config.log_level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false) // Hide redundant target in text output
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}
