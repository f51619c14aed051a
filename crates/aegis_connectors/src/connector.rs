//! The Connector contract: a process-wide singleton gateway to an external
//! system, shared across plugin instances.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ConnectorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectorStatus {
    Stopped,
    Starting,
    Running,
    Failed(String),
}

/// Capability surface exposed to plugins through `ConnectorAPI::get_connector`.
/// Concrete connectors extend this with their own trait (e.g. `NotifyHandle`)
/// and callers downcast via `as_any`.
pub trait ConnectorHandle: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;
    async fn start(&self) -> Result<(), ConnectorError>;
    async fn stop(&self) -> Result<(), ConnectorError>;
    fn status(&self) -> ConnectorStatus;
    fn handle(&self) -> Arc<dyn ConnectorHandle>;
}
