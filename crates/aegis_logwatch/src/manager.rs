//! Registry of per-server log watchers, mirroring `aegis_rcon::manager`'s
//! shape on the log-watching side.

use std::sync::Arc;

use aegis_event_bus::{EventBus, EventFilter, ServerId, Subscription};
use dashmap::DashMap;
use tracing::info;

use crate::error::LogWatchError;
use crate::events;
use crate::source::{CursorStore, LogSourceConfig};
use crate::watcher::{self, WatcherHandle};

pub struct LogWatcherManager {
    bus: EventBus,
    cursor_store: Arc<CursorStore>,
    watchers: DashMap<ServerId, WatcherHandle>,
}

impl LogWatcherManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            cursor_store: Arc::new(CursorStore::new()),
            watchers: DashMap::new(),
        }
    }

    /// At most one `LogSource` exists per `ServerId` (data-model
    /// invariant): re-adding an already-configured server is rejected.
    pub fn add_server(
        &self,
        server_id: ServerId,
        config: LogSourceConfig,
    ) -> Result<(), LogWatchError> {
        if self.watchers.contains_key(&server_id) {
            return Err(LogWatchError::ServerAlreadyExists(server_id.to_string()));
        }
        let handle = watcher::spawn(server_id, config, self.bus.clone(), self.cursor_store.clone());
        self.watchers.insert(server_id, handle);
        info!(server_id = %server_id, "log source added");
        Ok(())
    }

    pub async fn remove_server(&self, server_id: ServerId) -> Result<(), LogWatchError> {
        match self.watchers.remove(&server_id) {
            Some((_, handle)) => {
                handle.shutdown().await;
                self.cursor_store.remove(server_id);
                info!(server_id = %server_id, "log source removed");
                Ok(())
            }
            None => Err(LogWatchError::ServerNotFound(server_id.to_string())),
        }
    }

    pub fn offset(&self, server_id: ServerId) -> u64 {
        self.cursor_store.get(server_id)
    }

    /// Subscribes to every log-originated event for a single server.
    pub fn subscribe(&self, server_id: ServerId) -> Subscription {
        self.bus.subscribe(
            EventFilter::for_server(server_id).with_types([
                events::TYPE_PLAYER_CONNECTED,
                events::TYPE_PLAYER_DISCONNECTED,
                events::TYPE_JOIN_SUCCEEDED,
                events::TYPE_PLAYER_POSSESS,
                events::TYPE_PLAYER_DAMAGED,
                events::TYPE_PLAYER_WOUNDED,
                events::TYPE_PLAYER_DIED,
                events::TYPE_PLAYER_REVIVED,
                events::TYPE_PLAYER_SQUAD_CHANGE,
                events::TYPE_PLAYER_TEAM_CHANGE,
                events::TYPE_DEPLOYABLE_DAMAGED,
                events::TYPE_ADMIN_BROADCAST,
                events::TYPE_TICK_RATE,
                events::TYPE_NEW_GAME,
                events::TYPE_ROUND_ENDED,
                events::TYPE_TEAMKILL,
            ]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_server_id_is_rejected() {
        let manager = LogWatcherManager::new(EventBus::new());
        let server_id = ServerId::new();
        let config = LogSourceConfig::local("/tmp/does-not-matter.log");
        manager.add_server(server_id, config.clone()).unwrap();
        assert!(matches!(
            manager.add_server(server_id, config),
            Err(LogWatchError::ServerAlreadyExists(_))
        ));
        manager.remove_server(server_id).await.unwrap();
    }

    #[tokio::test]
    async fn removing_unknown_server_is_not_found() {
        let manager = LogWatcherManager::new(EventBus::new());
        assert!(matches!(
            manager.remove_server(ServerId::new()).await,
            Err(LogWatchError::ServerNotFound(_))
        ));
    }
}
