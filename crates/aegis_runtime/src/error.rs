//! Top-level error type wrapping every subsystem's own `thiserror` enum,
//! matching the teacher's per-crate error split rolled up at the binary
//! boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AegisError {
    #[error(transparent)]
    Rcon(#[from] aegis_rcon::RconError),

    #[error(transparent)]
    LogWatch(#[from] aegis_logwatch::LogWatchError),

    #[error(transparent)]
    EventBus(#[from] aegis_event_bus::EventBusError),

    #[error(transparent)]
    Plugin(#[from] aegis_plugin_system::PluginError),

    #[error(transparent)]
    Connector(#[from] aegis_connectors::ConnectorError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server id '{0}' is configured more than once")]
    DuplicateServer(String),
}
