//! The plugin contract every loaded plugin (built-in or dynamically
//! loaded) implements, and the handles the manager hands it at each
//! lifecycle stage.
//!
//! Methods take `&self` rather than `&mut self`: implementations manage
//! their own interior mutability, since a handle to the same instance can
//! be invoked concurrently for config updates and event dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::api::PluginApis;
use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::sandbox::WorkerGuard;
use aegis_event_bus::Event;

/// Passed to `start`; carries the cancellation signal a long-running
/// plugin should honor and, for dynamically loaded plugins, a way to
/// register its own spawned workers with the resource sandbox.
#[derive(Clone)]
pub struct PluginContext {
    pub cancel: CancellationToken,
    pub(crate) sandbox: Option<std::sync::Weak<crate::sandbox::SandboxMonitor>>,
}

impl PluginContext {
    /// Registers a worker the plugin is about to spawn with the instance's
    /// resource sandbox. The returned guard deregisters it on drop. Returns
    /// `None` for built-in plugins, which are not sandboxed.
    pub fn track_worker(&self) -> Option<WorkerGuard> {
        let monitor = self.sandbox.as_ref()?.upgrade()?;
        Some(monitor.track_worker())
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Static metadata: id, version, config schema, declared event types,
    /// required connectors, and instance/feature flags.
    fn definition(&self) -> PluginDefinition;

    /// Called once per instance before `start`, with its validated config
    /// and its capability handles. Non-idempotent: a failure here means
    /// the instance is discarded, not retried.
    async fn initialize(&self, config: HashMap<String, Value>, apis: PluginApis) -> Result<(), PluginError>;

    /// Idempotent: calling `start` on an already-running instance is a
    /// no-op success.
    async fn start(&self, ctx: PluginContext) -> Result<(), PluginError>;

    /// Idempotent: calling `stop` on an already-stopped instance is a
    /// no-op success. Should return promptly once `ctx.cancel` fires.
    async fn stop(&self) -> Result<(), PluginError>;

    /// Invoked for every bus event matching this instance's declared event
    /// types and server id. Calls for a single instance are serialized per
    /// event type, never per instance overall.
    async fn handle_event(&self, event: Arc<Event>) -> Result<(), PluginError>;

    /// Applies a new validated config atomically. The default
    /// implementation rejects changes; plugins that support live
    /// reconfiguration override it.
    async fn update_config(&self, _config: HashMap<String, Value>) -> Result<(), PluginError> {
        Err(PluginError::ConfigInvalid(
            "this plugin does not support live config updates".to_string(),
        ))
    }
}
