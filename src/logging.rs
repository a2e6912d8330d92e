//! Tracing setup: environment-filtered stdout layer plus a daily-rotated
//! file layer under the data directory.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` controls filtering (default "info"), e.g.
/// `RUST_LOG=frontierd=debug,sled=warn`.
///
/// Returns an error if the log directory cannot be created; panics if a
/// subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_path, "frontierd.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact();

    let stdout_layer = fmt::layer().with_target(false).compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the process for the background writer to flush.
    Box::leak(Box::new(file_guard));

    tracing::info!(dir = %log_path.display(), "logging initialized");
    Ok(())
}
