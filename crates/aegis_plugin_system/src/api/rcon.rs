//! RCON capability: plugin-facing wrapper over `aegis_rcon::RconManager`.

use std::time::Duration;

use async_trait::async_trait;
use aegis_event_bus::EventId;

use super::ApiCore;
use crate::error::PluginError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait RconApi: Send + Sync {
    async fn send_command(&self, command: &str) -> Result<String, PluginError>;
    async fn broadcast(&self, message: &str) -> Result<(), PluginError>;
    async fn warn(&self, player_id: &str, message: &str) -> Result<(), PluginError>;
    async fn kick(&self, player_id: &str, reason: &str) -> Result<(), PluginError>;
    /// Bans `player_id` and records the event that justified the ban (e.g.
    /// a detected teamkill) alongside it. Ban-list persistence and sync to
    /// other servers are out of scope for this core; the evidence is kept
    /// only in this instance's own plugin-data namespace.
    async fn ban_with_evidence(
        &self,
        player_id: &str,
        reason: &str,
        duration: &str,
        evidence_event_id: EventId,
        evidence_type: &str,
    ) -> Result<(), PluginError>;
    async fn remove_from_squad(&self, player_id: &str) -> Result<(), PluginError>;
    async fn force_team_change(&self, player_id: &str) -> Result<(), PluginError>;
}

pub(crate) struct RconApiImpl(pub(crate) ApiCore);

impl RconApiImpl {
    async fn execute(&self, command: String) -> Result<String, PluginError> {
        let manager = self.0.manager()?;
        manager
            .rcon
            .execute(self.0.server_id, &command, COMMAND_TIMEOUT)
            .await
            .map_err(|e| PluginError::ExecutionError(e.to_string()))
    }
}

#[async_trait]
impl RconApi for RconApiImpl {
    async fn send_command(&self, command: &str) -> Result<String, PluginError> {
        self.execute(command.to_string()).await
    }

    async fn broadcast(&self, message: &str) -> Result<(), PluginError> {
        self.execute(format!("AdminBroadcast {message}")).await.map(|_| ())
    }

    async fn warn(&self, player_id: &str, message: &str) -> Result<(), PluginError> {
        self.execute(format!("AdminWarn {player_id} {message}")).await.map(|_| ())
    }

    async fn kick(&self, player_id: &str, reason: &str) -> Result<(), PluginError> {
        self.execute(format!("AdminKick {player_id} {reason}")).await.map(|_| ())
    }

    async fn ban_with_evidence(
        &self,
        player_id: &str,
        reason: &str,
        duration: &str,
        evidence_event_id: EventId,
        evidence_type: &str,
    ) -> Result<(), PluginError> {
        self.execute(format!("AdminBan {player_id} {duration} {reason}")).await?;
        let manager = self.0.manager()?;
        manager.record_ban_evidence(self.0.instance_id, player_id, evidence_event_id, evidence_type, reason);
        Ok(())
    }

    async fn remove_from_squad(&self, player_id: &str) -> Result<(), PluginError> {
        self.execute(format!("AdminRemovePlayerFromSquadById {player_id} 0"))
            .await
            .map(|_| ())
    }

    async fn force_team_change(&self, player_id: &str) -> Result<(), PluginError> {
        self.execute(format!("AdminForceTeamChange {player_id}")).await.map(|_| ())
    }
}
