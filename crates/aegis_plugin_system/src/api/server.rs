//! Read-only server-state capability: the same snapshots the RCON
//! connection manager already maintains, re-executed on demand for a
//! plugin rather than read from its periodic snapshot cache, so a plugin
//! always sees a fresh view.

use std::time::Duration;

use async_trait::async_trait;

use aegis_rcon::{parse_player_list, parse_server_info, parse_squad_list, PlayerListSnapshot, ServerInfoSnapshot, SquadListSnapshot};

use super::ApiCore;
use crate::error::PluginError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn get_players(&self) -> Result<PlayerListSnapshot, PluginError>;
    async fn get_squads(&self) -> Result<SquadListSnapshot, PluginError>;
    /// The admin SteamID allowlist configured for this instance's server.
    /// Admin-permission storage itself is out of scope for this core; the
    /// list is sourced from the server's own static configuration.
    async fn get_admins(&self) -> Result<Vec<String>, PluginError>;
    async fn get_server_info(&self) -> Result<ServerInfoSnapshot, PluginError>;
}

pub(crate) struct ServerApiImpl(pub(crate) ApiCore);

#[async_trait]
impl ServerApi for ServerApiImpl {
    async fn get_players(&self) -> Result<PlayerListSnapshot, PluginError> {
        let manager = self.0.manager()?;
        let body = manager
            .rcon
            .execute(self.0.server_id, "ListPlayers", COMMAND_TIMEOUT)
            .await
            .map_err(|e| PluginError::ExecutionError(e.to_string()))?;
        Ok(parse_player_list(&body))
    }

    async fn get_squads(&self) -> Result<SquadListSnapshot, PluginError> {
        let manager = self.0.manager()?;
        let body = manager
            .rcon
            .execute(self.0.server_id, "ListSquads", COMMAND_TIMEOUT)
            .await
            .map_err(|e| PluginError::ExecutionError(e.to_string()))?;
        Ok(parse_squad_list(&body))
    }

    async fn get_admins(&self) -> Result<Vec<String>, PluginError> {
        let manager = self.0.manager()?;
        Ok(manager
            .admins
            .get(&self.0.server_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn get_server_info(&self) -> Result<ServerInfoSnapshot, PluginError> {
        let manager = self.0.manager()?;
        let body = manager
            .rcon
            .execute(self.0.server_id, "ShowServerInfo", COMMAND_TIMEOUT)
            .await
            .map_err(|e| PluginError::ExecutionError(e.to_string()))?;
        Ok(parse_server_info(&body))
    }
}
