//! Process-wide registry and lifecycle for shared connectors.
//!
//! Grounded in the teacher's `DashMap`-keyed registry idiom
//! (`plugin_system::manager::PluginManager::loaded_plugins`), generalized
//! from dynamic-library instances to long-lived connector singletons.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::connector::{Connector, ConnectorHandle, ConnectorStatus};
use crate::error::ConnectorError;

pub struct ConnectorManager {
    connectors: DashMap<String, Arc<dyn Connector>>,
}

impl ConnectorManager {
    pub fn new() -> Self {
        Self {
            connectors: DashMap::new(),
        }
    }

    pub fn register(&self, connector: Arc<dyn Connector>) {
        let id = connector.id().to_string();
        info!(connector = %id, "connector registered");
        self.connectors.insert(id, connector);
    }

    pub async fn start(&self, id: &str) -> Result<(), ConnectorError> {
        let connector = self.get(id)?;
        if connector.status() == ConnectorStatus::Running {
            return Err(ConnectorError::AlreadyRunning(id.to_string()));
        }
        connector.start().await?;
        info!(connector = id, "connector started");
        Ok(())
    }

    pub async fn stop(&self, id: &str) -> Result<(), ConnectorError> {
        let connector = self.get(id)?;
        connector.stop().await?;
        info!(connector = id, "connector stopped");
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<ConnectorStatus, ConnectorError> {
        Ok(self.get(id)?.status())
    }

    pub fn is_running(&self, id: &str) -> bool {
        matches!(self.status(id), Ok(ConnectorStatus::Running))
    }

    /// Used by the Plugin Manager to enforce that every `required connector`
    /// a plugin instance declares is running before it starts.
    pub fn ensure_all_running(&self, ids: &[String]) -> Result<(), ConnectorError> {
        for id in ids {
            if !self.is_running(id) {
                warn!(connector = %id, "required connector is not running");
                return Err(ConnectorError::NotRunning(id.clone()));
            }
        }
        Ok(())
    }

    pub fn get_handle(&self, id: &str) -> Result<Arc<dyn ConnectorHandle>, ConnectorError> {
        let connector = self.get(id)?;
        if connector.status() != ConnectorStatus::Running {
            return Err(ConnectorError::NotRunning(id.to_string()));
        }
        Ok(connector.handle())
    }

    fn get(&self, id: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ConnectorError::NotFound(id.to_string()))
    }
}

impl Default for ConnectorManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::WebhookConnector;

    #[tokio::test]
    async fn unregistered_connector_is_not_found() {
        let manager = ConnectorManager::new();
        assert!(matches!(
            manager.start("webhook").await,
            Err(ConnectorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_then_running_then_required_check_passes() {
        let manager = ConnectorManager::new();
        manager.register(Arc::new(WebhookConnector::new(
            "webhook",
            "https://example.invalid/hook",
        )));

        assert!(!manager.is_running("webhook"));
        assert!(manager
            .ensure_all_running(&["webhook".to_string()])
            .is_err());

        manager.start("webhook").await.unwrap();
        assert!(manager.is_running("webhook"));
        assert!(manager
            .ensure_all_running(&["webhook".to_string()])
            .is_ok());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let manager = ConnectorManager::new();
        manager.register(Arc::new(WebhookConnector::new(
            "webhook",
            "https://example.invalid/hook",
        )));
        manager.start("webhook").await.unwrap();
        assert!(matches!(
            manager.start("webhook").await,
            Err(ConnectorError::AlreadyRunning(_))
        ));
    }
}
