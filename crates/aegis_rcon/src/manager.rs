//! Registry of per-server RCON connections.

use std::sync::Arc;
use std::time::Duration;

use aegis_event_bus::{EventBus, EventFilter, ServerId, Subscription};
use dashmap::DashMap;
use tracing::info;

use crate::connection::{ConnectionState, RconConnection, RconServerConfig};
use crate::error::RconError;
use crate::events;

pub struct RconManager {
    bus: EventBus,
    connections: DashMap<ServerId, Arc<RconConnection>>,
}

impl RconManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            connections: DashMap::new(),
        }
    }

    /// At most one `RconConnection` exists per `ServerId` (data-model
    /// invariant): re-adding an already-configured server is rejected.
    pub fn add_server(
        &self,
        server_id: ServerId,
        config: RconServerConfig,
    ) -> Result<(), RconError> {
        if self.connections.contains_key(&server_id) {
            return Err(RconError::ServerAlreadyExists(server_id.to_string()));
        }
        let connection = RconConnection::spawn(server_id, config, self.bus.clone());
        self.connections.insert(server_id, connection);
        info!(server_id = %server_id, "rcon server added");
        Ok(())
    }

    pub fn remove_server(&self, server_id: ServerId) -> Result<(), RconError> {
        match self.connections.remove(&server_id) {
            Some((_, connection)) => {
                connection.shutdown();
                info!(server_id = %server_id, "rcon server removed");
                Ok(())
            }
            None => Err(RconError::ServerNotFound(server_id.to_string())),
        }
    }

    pub async fn execute(
        &self,
        server_id: ServerId,
        command: &str,
        deadline: Duration,
    ) -> Result<String, RconError> {
        let connection = self.get(server_id)?;
        connection.execute(command, deadline).await
    }

    pub async fn state(&self, server_id: ServerId) -> Result<ConnectionState, RconError> {
        Ok(self.get(server_id)?.state().await)
    }

    /// Subscribes to every RCON-originated event for a single server.
    pub fn subscribe(&self, server_id: ServerId) -> Subscription {
        self.bus.subscribe(
            EventFilter::for_server(server_id).with_types([
                events::TYPE_CHAT_MESSAGE,
                events::TYPE_ADMIN_BROADCAST,
                events::TYPE_PLAYER_WARNED,
                events::TYPE_PLAYER_KICKED,
                events::TYPE_PLAYER_BANNED,
                events::TYPE_SQUAD_CREATED,
                events::TYPE_PLAYER_LIST_SNAPSHOT,
                events::TYPE_SQUAD_LIST_SNAPSHOT,
                events::TYPE_SERVER_INFO_SNAPSHOT,
            ]),
        )
    }

    fn get(&self, server_id: ServerId) -> Result<Arc<RconConnection>, RconError> {
        self.connections
            .get(&server_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RconError::ServerNotFound(server_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_server_id_is_rejected() {
        let manager = RconManager::new(EventBus::new());
        let server_id = ServerId::new();
        let config = RconServerConfig {
            address: "127.0.0.1:1".to_string(),
            password: "secret".to_string(),
        };
        manager.add_server(server_id, config.clone()).unwrap();
        assert!(matches!(
            manager.add_server(server_id, config),
            Err(RconError::ServerAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn missing_server_execute_returns_not_found() {
        let manager = RconManager::new(EventBus::new());
        let result = manager
            .execute(ServerId::new(), "ListPlayers", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RconError::ServerNotFound(_))));
    }
}
