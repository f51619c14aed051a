//! Command-line interface for the Aegis runtime core binary.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command-line overrides layered on top of the TOML config file. Per
/// SPEC_FULL §4's environment-variable section, the precedence across
/// every source is flag > env > file > default.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        let matches = Command::new("aegis")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Squad Aegis runtime core: RCON manager, log watcher, event bus, and plugin host")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Path to the TOML configuration file")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error); overrides AEGIS_LOG_LEVEL and the config file"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Emit structured JSON logs instead of human-readable ones")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("default config path is always set"),
            ),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
