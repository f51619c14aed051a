//! Built-in connector grounding the abstraction in a concrete example: an
//! HTTP webhook gateway for chat and admin-broadcast notifications.

use std::any::Any;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::connector::{Connector, ConnectorHandle, ConnectorStatus};
use crate::error::ConnectorError;

struct Inner {
    id: String,
    url: String,
    client: reqwest::Client,
    status: RwLock<ConnectorStatus>,
}

/// Posts JSON `{ "text": message }` payloads to a configured HTTP endpoint.
pub struct WebhookConnector {
    inner: Arc<Inner>,
}

impl WebhookConnector {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                url: url.into(),
                client,
                status: RwLock::new(ConnectorStatus::Stopped),
            }),
        }
    }
}

#[async_trait]
impl Connector for WebhookConnector {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn start(&self) -> Result<(), ConnectorError> {
        *self.inner.status.write().unwrap() = ConnectorStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ConnectorError> {
        *self.inner.status.write().unwrap() = ConnectorStatus::Stopped;
        Ok(())
    }

    fn status(&self) -> ConnectorStatus {
        self.inner.status.read().unwrap().clone()
    }

    fn handle(&self) -> Arc<dyn ConnectorHandle> {
        self.inner.clone()
    }
}

impl ConnectorHandle for Inner {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capability surface a plugin sees after downcasting the connector handle.
#[async_trait]
pub trait NotifyHandle: ConnectorHandle {
    async fn notify(&self, message: &str) -> Result<(), ConnectorError>;
}

#[async_trait]
impl NotifyHandle for Inner {
    async fn notify(&self, message: &str) -> Result<(), ConnectorError> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        Ok(())
    }
}
