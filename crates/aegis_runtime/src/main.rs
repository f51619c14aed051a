//! Binary entry point: CLI parsing, configuration loading, logging
//! setup, subsystem wiring via [`aegis_runtime::ServerSupervisor`], and
//! graceful shutdown on SIGINT/SIGTERM.
//!
//! Exit codes (SPEC_FULL §6): 0 normal shutdown, 1 fatal startup error,
//! 2 a second shutdown signal arrived while the first was still draining.

use aegis_runtime::cli::CliArgs;
use aegis_runtime::config::AppConfig;
use aegis_runtime::signals::wait_for_shutdown_signal;
use aegis_runtime::ServerSupervisor;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = aegis_runtime::logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration is invalid");
        std::process::exit(1);
    }

    info!(config = %args.config_path.display(), servers = config.servers.len(), "starting squad aegis runtime core");

    let supervisor = match ServerSupervisor::new(&config).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!(error = %e, "failed to build runtime core");
            std::process::exit(1);
        }
    };

    info!("runtime core is up; press ctrl+c to shut down");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "failed waiting for shutdown signal");
        std::process::exit(1);
    }

    tokio::spawn(async {
        if wait_for_shutdown_signal().await.is_ok() {
            warn!("second shutdown signal received; terminating immediately");
            std::process::exit(2);
        }
    });

    info!("beginning graceful shutdown");
    supervisor.shutdown().await;
    let stats = supervisor.bus_stats();
    info!(
        subscriptions = stats.subscription_count,
        published_total = stats.published_total,
        "runtime core shutdown complete"
    );
}
