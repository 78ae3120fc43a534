use std::path::Path;

use anyhow::Result;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console gets compact human-readable lines at `level`; the file layer
/// writes JSON to a daily-rolling `backhaul.log` under `log_dir`. A
/// `RUST_LOG` directive overrides the configured level entirely.
pub fn init(log_dir: &Path, level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().compact().with_target(true).with_ansi(true);

    let file_appender = rolling::daily(log_dir, "backhaul.log");
    let file_layer = fmt::layer()
        .json()
        .with_writer(file_appender)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        "Logging initialized (console + file: {}/backhaul.log)",
        log_dir.display()
    );
    Ok(())
}
