//! Connector-lookup capability: hands a plugin the handle for one of its
//! declared required connectors.

use std::sync::Arc;

use async_trait::async_trait;

use aegis_connectors::ConnectorHandle;

use super::ApiCore;
use crate::error::PluginError;

#[async_trait]
pub trait ConnectorApi: Send + Sync {
    async fn get_connector(&self, id: &str) -> Result<Arc<dyn ConnectorHandle>, PluginError>;
}

pub(crate) struct ConnectorApiImpl(pub(crate) ApiCore);

#[async_trait]
impl ConnectorApi for ConnectorApiImpl {
    async fn get_connector(&self, id: &str) -> Result<Arc<dyn ConnectorHandle>, PluginError> {
        let manager = self.0.manager()?;
        manager
            .connectors
            .get_handle(id)
            .map_err(|e| PluginError::ConnectorNotRunning(e.to_string()))
    }
}
