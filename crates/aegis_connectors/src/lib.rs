//! Process-wide shared services ("connectors") that plugin instances
//! depend on, e.g. a chat-notification gateway.

mod connector;
mod error;
mod manager;
mod webhook;

pub use connector::{Connector, ConnectorHandle, ConnectorStatus};
pub use error::ConnectorError;
pub use manager::ConnectorManager;
pub use webhook::{NotifyHandle, WebhookConnector};
