//! Logging system setup, the way the teacher's `horizon::logging` wires
//! `tracing-subscriber` behind a config-or-CLI choice of human/JSON
//! output.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Initializes the global `tracing` subscriber. `RUST_LOG`, when set,
/// takes precedence over the configured level.
pub fn setup_logging(config: &LoggingSettings, json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs || config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_file(false).with_line_number(false))
            .init();
    }

    info!(level = %config.level, json = json_logs || config.json_format, "logging initialized");
    Ok(())
}
