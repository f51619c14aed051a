//! Capability interfaces a plugin instance is handed at `initialize`.
//!
//! Every implementation is built around a [`ApiCore`]: a weak handle back
//! to the manager plus the instance and server this call bundle belongs
//! to. Once the manager (or just this instance) is torn down, the `Weak`
//! fails to upgrade and every call degrades to `PluginError::Runtime`
//! ("instance stopped") instead of reaching into freed state — the same
//! shape as the event bus's subscription-drop pattern, generalized from
//! "stop delivering" to "stop calling out".

mod connector;
mod database;
mod event;
mod log;
mod rcon;
mod server;

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use aegis_event_bus::ServerId;

use crate::error::PluginError;
use crate::instance::InstanceId;
use crate::manager::ManagerInner;

pub use connector::ConnectorApi;
pub use database::DatabaseApi;
pub use event::EventApi;
pub use log::LogApi;
pub use rcon::RconApi;
pub use server::ServerApi;

pub(crate) use connector::ConnectorApiImpl;
pub(crate) use database::DatabaseApiImpl;
pub(crate) use event::EventApiImpl;
pub(crate) use log::LogApiImpl;
pub(crate) use rcon::RconApiImpl;
pub(crate) use server::ServerApiImpl;

/// The bundle handed to `Plugin::initialize`.
#[derive(Clone)]
pub struct PluginApis {
    pub rcon: Arc<dyn RconApi>,
    pub server: Arc<dyn ServerApi>,
    pub database: Arc<dyn DatabaseApi>,
    pub log: Arc<dyn LogApi>,
    pub connector: Arc<dyn ConnectorApi>,
    pub event: Arc<dyn EventApi>,
}

#[derive(Clone)]
pub(crate) struct ApiCore {
    pub(crate) manager: Weak<ManagerInner>,
    pub(crate) instance_id: InstanceId,
    pub(crate) server_id: ServerId,
}

impl ApiCore {
    pub(crate) fn manager(&self) -> Result<Arc<ManagerInner>, PluginError> {
        self.manager
            .upgrade()
            .ok_or_else(|| PluginError::Runtime("instance stopped".to_string()))
    }
}

const FEATURE_RCON: &str = "rcon";
const FEATURE_SERVER: &str = "server";
const FEATURE_DATABASE: &str = "database";
const FEATURE_LOG: &str = "log";
const FEATURE_CONNECTOR: &str = "connector";
const FEATURE_EVENT: &str = "event";

fn allowed(required_features: Option<&HashSet<String>>, feature: &str) -> bool {
    match required_features {
        None => true,
        Some(features) => features.contains(feature),
    }
}

/// Builds the capability bundle for an instance. `required_features` is
/// `None` for built-in plugins (full, ungated access) and
/// `Some(&definition.required_features)` for dynamically loaded plugins,
/// whose feature gateway only exposes APIs they declared a need for.
pub(crate) fn build_apis(core: ApiCore, required_features: Option<&HashSet<String>>) -> PluginApis {
    PluginApis {
        rcon: if allowed(required_features, FEATURE_RCON) {
            Arc::new(RconApiImpl(core.clone()))
        } else {
            Arc::new(DeniedApi(FEATURE_RCON))
        },
        server: if allowed(required_features, FEATURE_SERVER) {
            Arc::new(ServerApiImpl(core.clone()))
        } else {
            Arc::new(DeniedApi(FEATURE_SERVER))
        },
        database: if allowed(required_features, FEATURE_DATABASE) {
            Arc::new(DatabaseApiImpl(core.clone()))
        } else {
            Arc::new(DeniedApi(FEATURE_DATABASE))
        },
        log: if allowed(required_features, FEATURE_LOG) {
            Arc::new(LogApiImpl(core.clone()))
        } else {
            Arc::new(DeniedApi(FEATURE_LOG))
        },
        connector: if allowed(required_features, FEATURE_CONNECTOR) {
            Arc::new(ConnectorApiImpl(core.clone()))
        } else {
            Arc::new(DeniedApi(FEATURE_CONNECTOR))
        },
        event: if allowed(required_features, FEATURE_EVENT) {
            Arc::new(EventApiImpl(core))
        } else {
            Arc::new(DeniedApi(FEATURE_EVENT))
        },
    }
}

/// Stands in for every capability a dynamically loaded plugin didn't
/// declare a `required_features` entry for.
struct DeniedApi(&'static str);

impl DeniedApi {
    fn denied(&self) -> PluginError {
        PluginError::PermissionDenied(format!("feature '{}' not declared", self.0))
    }
}

#[async_trait::async_trait]
impl RconApi for DeniedApi {
    async fn send_command(&self, _command: &str) -> Result<String, PluginError> {
        Err(self.denied())
    }
    async fn broadcast(&self, _message: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn warn(&self, _player_id: &str, _message: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn kick(&self, _player_id: &str, _reason: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn ban_with_evidence(
        &self,
        _player_id: &str,
        _reason: &str,
        _duration: &str,
        _evidence_event_id: aegis_event_bus::EventId,
        _evidence_type: &str,
    ) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn remove_from_squad(&self, _player_id: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn force_team_change(&self, _player_id: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
}

#[async_trait::async_trait]
impl ServerApi for DeniedApi {
    async fn get_players(&self) -> Result<aegis_rcon::PlayerListSnapshot, PluginError> {
        Err(self.denied())
    }
    async fn get_squads(&self) -> Result<aegis_rcon::SquadListSnapshot, PluginError> {
        Err(self.denied())
    }
    async fn get_admins(&self) -> Result<Vec<String>, PluginError> {
        Err(self.denied())
    }
    async fn get_server_info(&self) -> Result<aegis_rcon::ServerInfoSnapshot, PluginError> {
        Err(self.denied())
    }
}

#[async_trait::async_trait]
impl DatabaseApi for DeniedApi {
    async fn get_plugin_data(&self, _key: &str) -> Result<Option<serde_json::Value>, PluginError> {
        Err(self.denied())
    }
    async fn set_plugin_data(&self, _key: &str, _value: serde_json::Value) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn delete_plugin_data(&self, _key: &str) -> Result<(), PluginError> {
        Err(self.denied())
    }
    async fn execute_query(&self, _query: &str, _args: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, PluginError> {
        Err(self.denied())
    }
}

impl LogApi for DeniedApi {
    fn debug(&self, _message: &str, _fields: serde_json::Value) {}
    fn info(&self, _message: &str, _fields: serde_json::Value) {}
    fn warn(&self, _message: &str, _fields: serde_json::Value) {}
    fn error(&self, _message: &str, _fields: serde_json::Value) {}
}

#[async_trait::async_trait]
impl ConnectorApi for DeniedApi {
    async fn get_connector(&self, _id: &str) -> Result<Arc<dyn aegis_connectors::ConnectorHandle>, PluginError> {
        Err(self.denied())
    }
}

impl EventApi for DeniedApi {
    fn publish(&self, _type_tag: &str, _payload: serde_json::Value) {}
}
