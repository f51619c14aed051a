//! Thin orchestration library wiring the five runtime-core subsystems
//! together per configured game server.
//!
//! Built in the dependency order from spec.md §2 (leaves first): Event
//! Bus -> Connector Manager -> {RCON Manager, Log Watcher} -> Plugin
//! Manager. The binary in `main.rs` layers CLI parsing, logging setup,
//! and signal handling on top of [`ServerSupervisor`].

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use aegis_connectors::{ConnectorManager, WebhookConnector};
use aegis_event_bus::{EventBus, ServerId};
use aegis_logwatch::{shipper, LogWatcherManager, ShipperHandle};
use aegis_plugin_system::{KeyRegistry, LoaderSafetyConfig, LocalFsStore, PluginLoader, PluginManager};
use aegis_rcon::RconManager;
use base64::Engine;
use dashmap::DashMap;
use ed25519_dalek::VerifyingKey;
use tracing::{info, warn};

use crate::config::{AppConfig, ServerEntry};
use crate::error::AegisError;

/// Owns every subsystem and the per-server wiring between them. Built
/// once at startup from [`AppConfig`]; [`shutdown`](Self::shutdown) tears
/// it back down in the reverse order.
pub struct ServerSupervisor {
    pub bus: EventBus,
    pub connectors: Arc<ConnectorManager>,
    pub rcon: Arc<RconManager>,
    pub log_watcher: Arc<LogWatcherManager>,
    pub plugins: PluginManager,
    pub loader: Arc<PluginLoader>,
    shippers: DashMap<ServerId, ShipperHandle>,
}

impl ServerSupervisor {
    /// Builds every subsystem and registers every configured server and
    /// connector. The built-in plugin registry is frozen immediately
    /// after construction (per spec.md §9's global-state design note) —
    /// this core ships no compiled-in plugins of its own, so there is
    /// nothing to register before the freeze, but the freeze still runs
    /// before any instance dispatch begins.
    pub async fn new(config: &AppConfig) -> Result<Self, AegisError> {
        let bus = EventBus::new();
        let connectors = Arc::new(ConnectorManager::new());
        let rcon = Arc::new(RconManager::new(bus.clone()));
        let log_watcher = Arc::new(LogWatcherManager::new(bus.clone()));
        let plugins = PluginManager::new(bus.clone(), rcon.clone(), connectors.clone());

        let loader = Arc::new(build_loader(config)?);

        for webhook in &config.connectors.webhooks {
            connectors.register(Arc::new(WebhookConnector::new(
                webhook.id.clone(),
                webhook.url.clone(),
            )));
        }

        plugins.registry().freeze();

        let supervisor = Self {
            bus,
            connectors,
            rcon,
            log_watcher,
            plugins,
            loader,
            shippers: DashMap::new(),
        };

        for server in &config.servers {
            supervisor.add_server(server).await?;
        }

        Ok(supervisor)
    }

    /// Registers one configured server's RCON connection, log source,
    /// optional log-shipper listener, and enabled plugin instances.
    /// Per the data-model invariant, at most one `RconConnection` and one
    /// `LogSource` can exist for a given `ServerId` — a duplicate id in
    /// the config surfaces as an error from the respective manager.
    pub async fn add_server(&self, server: &ServerEntry) -> Result<(), AegisError> {
        let server_id = ServerId::from_uuid(server.id);
        info!(server = %server.name, server_id = %server_id, "registering server");

        self.rcon.add_server(server_id, server.rcon.clone())?;

        if !server.admins.is_empty() {
            self.plugins.set_admins(server_id, server.admins.clone());
        }

        if let Some(log_source) = &server.log_source {
            self.log_watcher.add_server(server_id, log_source.clone())?;
        }

        if let Some(shipper_settings) = &server.log_shipper {
            if let Some(bind_addr) = &shipper_settings.bind_addr {
                let token = std::env::var("AEGIS_LOG_SHIPPER_TOKEN").map_err(|_| {
                    AegisError::Config(
                        "AEGIS_LOG_SHIPPER_TOKEN must be set to enable a log shipper listener"
                            .to_string(),
                    )
                })?;
                let handle =
                    shipper::spawn(bind_addr, server_id, Arc::from(token.as_str()), self.bus.clone())
                        .await?;
                info!(server = %server.name, addr = %handle.local_addr, "log shipper listening");
                self.shippers.insert(server_id, handle);
            }
        }

        for instance_cfg in &server.plugins {
            if !instance_cfg.enabled {
                continue;
            }
            let instance_id = self
                .plugins
                .create_instance(&instance_cfg.plugin_id, server_id, instance_cfg.config.clone())
                .await?;
            self.plugins.start_instance(instance_id).await?;
            info!(
                server = %server.name,
                plugin = %instance_cfg.plugin_id,
                instance = %instance_id,
                "plugin instance started"
            );
        }

        Ok(())
    }

    /// Tears down a single server's RCON connection, log source, and log
    /// shipper listener. Running plugin instances for that server are
    /// left to the caller to stop first — this mirrors
    /// `PluginManager::remove_instance`'s own "stop before remove" shape
    /// rather than silently stopping instances as a side effect.
    pub async fn remove_server(&self, server_id: ServerId) -> Result<(), AegisError> {
        self.rcon.remove_server(server_id)?;
        if self.log_watcher.remove_server(server_id).await.is_err() {
            // No log source was configured for this server; not an error.
        }
        if let Some((_, handle)) = self.shippers.remove(&server_id) {
            handle.shutdown();
        }
        Ok(())
    }

    /// Snapshot of the event bus's delivery/drop counters, useful for a
    /// periodic health log the way the teacher's monitoring loop reports
    /// `EventSystemStats`.
    pub fn bus_stats(&self) -> aegis_event_bus::BusStats {
        self.bus.stats()
    }

    /// Stops every running plugin instance and every log-shipper
    /// listener. Individual RCON connections and log watchers are
    /// cancelled by simply dropping the supervisor — their background
    /// tasks hold a `CancellationToken` each, not a reference back here.
    pub async fn shutdown(&self) {
        for entry in self.shippers.iter() {
            entry.value().shutdown();
        }
        for instance_id in self.plugins.list_instances() {
            if let Err(e) = self.plugins.stop_instance(instance_id).await {
                warn!(instance = %instance_id, error = %e, "plugin instance failed to stop cleanly during shutdown");
            }
        }
    }
}

/// Builds the custom-plugin loader: trusted key set from config, local
/// filesystem binary store rooted at the plugin cache directory.
fn build_loader(config: &AppConfig) -> Result<PluginLoader, AegisError> {
    let keys = Arc::new(KeyRegistry::new());
    for trusted in &config.plugins.trusted_keys {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&trusted.public_key_base64)
            .map_err(|e| {
                AegisError::Config(format!(
                    "trusted key '{}' is not valid base64: {e}",
                    trusted.name
                ))
            })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            AegisError::Config(format!("trusted key '{}' must be 32 bytes", trusted.name))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AegisError::Config(format!("trusted key '{}' is invalid: {e}", trusted.name)))?;
        keys.add_key(trusted.name.clone(), key);
    }

    let cache_dir = PathBuf::from(&config.plugins.cache_dir);
    let store = Arc::new(LocalFsStore {
        root: cache_dir.clone(),
    });
    let safety = LoaderSafetyConfig {
        strict_versioning: config.plugins.strict_versioning,
    };
    Ok(PluginLoader::new(store, keys, cache_dir, safety))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginInstanceConfig, ServerEntry};
    use aegis_rcon::RconServerConfig;
    use uuid::Uuid;

    fn server_entry(name: &str) -> ServerEntry {
        ServerEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rcon: RconServerConfig {
                address: "127.0.0.1:1".to_string(),
                password: "secret".to_string(),
            },
            log_source: None,
            log_shipper: None,
            admins: Vec::new(),
            plugins: vec![PluginInstanceConfig {
                plugin_id: "does-not-exist".to_string(),
                config: Default::default(),
                enabled: true,
            }],
        }
    }

    #[tokio::test]
    async fn new_registers_every_configured_server() {
        let mut config = AppConfig::default();
        config.servers.push(ServerEntry {
            plugins: Vec::new(),
            ..server_entry("one")
        });

        let supervisor = ServerSupervisor::new(&config).await.unwrap();
        let server_id = ServerId::from_uuid(config.servers[0].id);
        assert!(supervisor.rcon.state(server_id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_plugin_id_surfaces_as_an_error() {
        let mut config = AppConfig::default();
        config.servers.push(server_entry("two"));

        let result = ServerSupervisor::new(&config).await;
        assert!(matches!(result, Err(AegisError::Plugin(_))));
    }

    #[tokio::test]
    async fn remove_server_tears_down_rcon_connection() {
        let mut config = AppConfig::default();
        config.servers.push(ServerEntry {
            plugins: Vec::new(),
            ..server_entry("three")
        });
        let supervisor = ServerSupervisor::new(&config).await.unwrap();
        let server_id = ServerId::from_uuid(config.servers[0].id);

        supervisor.remove_server(server_id).await.unwrap();
        assert!(supervisor.rcon.state(server_id).await.is_err());
    }
}
