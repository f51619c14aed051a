//! Plugin instance lifecycle and event dispatch.
//!
//! Grounded in the teacher's `plugin_system::manager::PluginManager`: a
//! `DashMap`-keyed table of loaded units, a safety-config-gated loading
//! path, and a controlled shutdown sequence. Generalized from "one static
//! set of plugins loaded once at startup" to "many independently
//! started/stopped/reconfigured instances, addressed per (plugin, server)
//! pair, with their own panic isolation and resource sandboxing."

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use aegis_connectors::ConnectorManager;
use aegis_event_bus::{Event, EventBus, EventFilter, EventId, ServerId};
use aegis_rcon::RconManager;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, ApiCore};
use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::instance::{InstanceId, InstanceStatus, PluginInstance};
use crate::loader::PluginLoader;
use crate::plugin::PluginContext;
use crate::registry::PluginRegistry;
use crate::sandbox::{SandboxLimits, SandboxMonitor, SAMPLE_INTERVAL};
use crate::state::{InMemoryStateStore, StateStore};

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

struct BanEvidenceRecord {
    player_id: String,
    evidence_event_id: EventId,
    evidence_type: String,
    reason: String,
}

pub(crate) struct ManagerInner {
    pub(crate) bus: EventBus,
    pub(crate) rcon: Arc<RconManager>,
    pub(crate) connectors: Arc<ConnectorManager>,
    pub(crate) registry: PluginRegistry,
    pub(crate) instances: DashMap<InstanceId, Arc<PluginInstance>>,
    singleton_index: DashMap<(String, ServerId), InstanceId>,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) admins: DashMap<ServerId, Vec<String>>,
    ban_evidence: DashMap<InstanceId, Vec<BanEvidenceRecord>>,
    /// One ordered worker queue per `(instance, event-type)` pair. Events
    /// for the same key are sent in publish order by the single dispatch
    /// loop task and drained by one worker that awaits each handler call
    /// before taking the next, so handler invocations for a given pair
    /// never race and never reorder.
    dispatch_queues: DashMap<(InstanceId, String), mpsc::UnboundedSender<Arc<Event>>>,
    sandboxes: DashMap<InstanceId, Arc<SandboxMonitor>>,
}

impl ManagerInner {
    pub(crate) fn record_ban_evidence(&self, instance_id: InstanceId, player_id: &str, evidence_event_id: EventId, evidence_type: &str, reason: &str) {
        self.ban_evidence.entry(instance_id).or_default().push(BanEvidenceRecord {
            player_id: player_id.to_string(),
            evidence_event_id,
            evidence_type: evidence_type.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Owns every plugin instance's lifecycle and feeds them events off the
/// bus. Cloning is cheap — internally it's an `Arc`.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
    dispatch_cancel: CancellationToken,
}

impl PluginManager {
    pub fn new(bus: EventBus, rcon: Arc<RconManager>, connectors: Arc<ConnectorManager>) -> Self {
        Self::with_state_store(bus, rcon, connectors, Arc::new(InMemoryStateStore::new()))
    }

    /// Like [`PluginManager::new`], but with the per-instance KV namespace
    /// backed by a caller-supplied [`StateStore`] instead of the in-memory
    /// default — the seam a durable backend would plug into.
    pub fn with_state_store(
        bus: EventBus,
        rcon: Arc<RconManager>,
        connectors: Arc<ConnectorManager>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            bus,
            rcon,
            connectors,
            registry: PluginRegistry::new(),
            instances: DashMap::new(),
            singleton_index: DashMap::new(),
            state,
            admins: DashMap::new(),
            ban_evidence: DashMap::new(),
            dispatch_queues: DashMap::new(),
            sandboxes: DashMap::new(),
        });
        let dispatch_cancel = CancellationToken::new();
        spawn_dispatch_loop(inner.clone(), dispatch_cancel.clone());
        Self { inner, dispatch_cancel }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    /// Completes the dynamic-loading pipeline (spec.md §4.4 steps 5-7):
    /// resolves a verified, permission-granted upload's library symbols
    /// through `loader` and registers the result in the dynamic registry,
    /// where `create_instance` can find it by plugin id like any built-in.
    /// Signature, SDK version, and permission checks all happened inside
    /// `loader.load` before this call ever touches the binary's symbols.
    pub async fn load_custom_plugin(
        &self,
        loader: &PluginLoader,
        plugin_id: &str,
        granted_permissions: &HashSet<String>,
    ) -> Result<(), PluginError> {
        let (definition, factory) = loader.load(plugin_id, granted_permissions).await?;
        self.inner.registry.register_dynamic(definition, factory);
        info!(plugin_id, "custom plugin loaded and registered");
        Ok(())
    }

    /// Removes a custom plugin's definition from the registry. Running
    /// instances are unaffected until they are explicitly stopped and
    /// removed; a fresh `create_instance` call for this id fails once the
    /// definition is gone.
    pub fn unload_custom_plugin(&self, plugin_id: &str) {
        self.inner.registry.unregister_dynamic(plugin_id);
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn set_admins(&self, server_id: ServerId, steam_ids: Vec<String>) {
        self.inner.admins.insert(server_id, steam_ids);
    }

    /// Creates (but does not start) an instance of `plugin_id` for
    /// `server_id`. Rejects a second instance when the definition declares
    /// `allow_multiple_instances = false` and one already exists for this
    /// server — the constraint is per-`ServerId`, not process-wide.
    pub async fn create_instance(&self, plugin_id: &str, server_id: ServerId, config: std::collections::HashMap<String, serde_json::Value>) -> Result<InstanceId, PluginError> {
        let (definition, factory, is_dynamic) = self
            .inner
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;

        if !definition.allow_multiple_instances && self.inner.singleton_index.contains_key(&(plugin_id.to_string(), server_id)) {
            return Err(PluginError::InstanceAlreadyExists(plugin_id.to_string()));
        }

        let validated_config = definition.config_schema.validate(&config)?;

        if !definition.declared_required_connectors.is_empty() {
            let ids: Vec<String> = definition.declared_required_connectors.iter().cloned().collect();
            self.inner
                .connectors
                .ensure_all_running(&ids)
                .map_err(|e| PluginError::ConnectorNotRunning(e.to_string()))?;
        }

        let plugin = factory();
        let instance = Arc::new(PluginInstance::new(definition.clone(), server_id, is_dynamic, validated_config.clone(), plugin.clone()));

        let core = ApiCore {
            manager: Arc::downgrade(&self.inner),
            instance_id: instance.id,
            server_id,
        };
        let required_features = is_dynamic.then_some(&definition.required_features);
        let apis = api::build_apis(core, required_features);

        if let Err(e) = plugin.initialize(validated_config, apis).await {
            return Err(PluginError::InitializationFailed(e.to_string()));
        }

        self.inner.instances.insert(instance.id, instance.clone());
        if !definition.allow_multiple_instances {
            self.inner.singleton_index.insert((plugin_id.to_string(), server_id), instance.id);
        }
        info!(plugin_id, instance = %instance.id, server_id = %server_id, "plugin instance created");
        Ok(instance.id)
    }

    /// Idempotent: starting an already-`Running` instance succeeds without
    /// calling into the plugin again.
    pub async fn start_instance(&self, instance_id: InstanceId) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        if instance.status() == InstanceStatus::Running {
            return Ok(());
        }

        if !instance.definition.declared_required_connectors.is_empty() {
            let ids: Vec<String> = instance.definition.declared_required_connectors.iter().cloned().collect();
            self.inner
                .connectors
                .ensure_all_running(&ids)
                .map_err(|e| PluginError::ConnectorNotRunning(e.to_string()))?;
        }

        instance.set_status(InstanceStatus::Starting);
        let sandbox = instance.is_dynamic.then(|| {
            let monitor = SandboxMonitor::new(SandboxLimits::default());
            self.inner.sandboxes.insert(instance_id, monitor.clone());
            monitor
        });
        let ctx = PluginContext {
            cancel: instance.cancel.clone(),
            sandbox: sandbox.as_ref().map(Arc::downgrade),
        };

        match instance.plugin.start(ctx).await {
            Ok(()) => {
                instance.set_status(InstanceStatus::Running);
                if let Some(monitor) = sandbox {
                    spawn_sandbox_task(self.inner.clone(), instance.clone(), monitor);
                }
                info!(instance = %instance_id, "plugin instance started");
                Ok(())
            }
            Err(e) => {
                instance.set_status(InstanceStatus::Failed(e.to_string()));
                self.inner.sandboxes.remove(&instance_id);
                Err(e)
            }
        }
    }

    /// Idempotent: stopping an already-`Stopped` instance succeeds without
    /// calling into the plugin again. A plugin that doesn't return from
    /// `stop` within 30s is forced to `Failed`.
    pub async fn stop_instance(&self, instance_id: InstanceId) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        if instance.status() == InstanceStatus::Stopped {
            return Ok(());
        }

        instance.set_status(InstanceStatus::Stopping);
        instance.cancel.cancel();

        match tokio::time::timeout(STOP_TIMEOUT, instance.plugin.stop()).await {
            Ok(Ok(())) => {
                instance.set_status(InstanceStatus::Stopped);
                self.inner.sandboxes.remove(&instance_id);
                info!(instance = %instance_id, "plugin instance stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                instance.set_status(InstanceStatus::Failed(e.to_string()));
                Err(e)
            }
            Err(_) => {
                let message = "stop timed out after 30s".to_string();
                instance.set_status(InstanceStatus::Failed(message.clone()));
                warn!(instance = %instance_id, "plugin instance stop timed out");
                Err(PluginError::Runtime(message))
            }
        }
    }

    pub async fn update_config(&self, instance_id: InstanceId, config: std::collections::HashMap<String, serde_json::Value>) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        let validated = instance.definition.config_schema.validate(&config)?;
        instance.plugin.update_config(validated.clone()).await?;
        instance.config.swap(validated);
        Ok(())
    }

    pub fn set_log_level(&self, instance_id: InstanceId, level: aegis_event_bus::LogLevel) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        *instance.log_level.write().unwrap() = level;
        Ok(())
    }

    /// An operator action that clears a `Failed` instance back to
    /// `Stopped`, allowing `start_instance` to be retried.
    pub fn clear_failure(&self, instance_id: InstanceId) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        if let InstanceStatus::Failed(_) = instance.status() {
            instance.set_status(InstanceStatus::Stopped);
        }
        Ok(())
    }

    pub async fn remove_instance(&self, instance_id: InstanceId) -> Result<(), PluginError> {
        let instance = self.get_instance(instance_id)?;
        if instance.status() != InstanceStatus::Stopped {
            self.stop_instance(instance_id).await.ok();
        }
        self.inner.instances.remove(&instance_id);
        self.inner
            .singleton_index
            .retain(|_, v| *v != instance_id);
        self.inner.sandboxes.remove(&instance_id);
        // Dropping the sender closes the worker's channel; it drains
        // whatever is already queued, then exits.
        self.inner
            .dispatch_queues
            .retain(|(id, _), _| *id != instance_id);
        self.inner.state.clear_instance(instance_id);
        Ok(())
    }

    pub fn instance_status(&self, instance_id: InstanceId) -> Result<InstanceStatus, PluginError> {
        Ok(self.get_instance(instance_id)?.status())
    }

    pub fn instance_config(&self, instance_id: InstanceId) -> Result<Arc<std::collections::HashMap<String, serde_json::Value>>, PluginError> {
        Ok(self.get_instance(instance_id)?.config())
    }

    pub fn list_instances(&self) -> Vec<InstanceId> {
        self.inner.instances.iter().map(|e| *e.key()).collect()
    }

    fn get_instance(&self, instance_id: InstanceId) -> Result<Arc<PluginInstance>, PluginError> {
        self.inner
            .instances
            .get(&instance_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PluginError::NotFound(instance_id.to_string()))
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.dispatch_cancel.cancel();
    }
}

fn spawn_dispatch_loop(inner: Arc<ManagerInner>, cancel: CancellationToken) {
    let subscription = inner.bus.subscribe(EventFilter::all());
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => event,
            };
            let Some(event) = event else { break };
            dispatch(&inner, event);
        }
    });
}

fn dispatch(inner: &Arc<ManagerInner>, event: Arc<Event>) {
    for entry in inner.instances.iter() {
        let instance = entry.value().clone();
        if instance.server_id != event.server_id {
            continue;
        }
        if instance.status() != InstanceStatus::Running {
            continue;
        }
        if !instance.definition.declared_event_types.contains(&event.type_tag) {
            continue;
        }
        enqueue(inner, instance, event.clone());
    }
}

/// Enqueues `event` onto the ordered worker for `(instance, event.type_tag)`,
/// spawning that worker on first use. `dispatch` runs on a single task (the
/// bus subscription consumer), so sends for the same key happen in publish
/// order; the worker drains its channel one event at a time, awaiting each
/// handler call before the next, so invocations for a given pair run
/// strictly in that order and never concurrently.
fn enqueue(inner: &Arc<ManagerInner>, instance: Arc<PluginInstance>, event: Arc<Event>) {
    let key = (instance.id, event.type_tag.clone());
    let sender = inner
        .dispatch_queues
        .entry(key.clone())
        .or_insert_with(|| spawn_dispatch_worker(inner.clone(), instance, key))
        .clone();
    let _ = sender.send(event);
}

fn spawn_dispatch_worker(
    inner: Arc<ManagerInner>,
    instance: Arc<PluginInstance>,
    key: (InstanceId, String),
) -> mpsc::UnboundedSender<Arc<Event>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Event>>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            invoke_handler(&instance, event).await;
        }
        inner.dispatch_queues.remove(&key);
    });
    tx
}

async fn invoke_handler(instance: &Arc<PluginInstance>, event: Arc<Event>) {
    if instance.status() != InstanceStatus::Running {
        return;
    }

    let plugin = instance.plugin.clone();
    let result = AssertUnwindSafe(plugin.handle_event(event)).catch_unwind().await;

    match result {
        Ok(Ok(())) => instance.failures.record_success(),
        Ok(Err(e)) => {
            warn!(instance = %instance.id, error = %e, "plugin handler returned an error");
            if instance.failures.record_failure() {
                instance.set_status(InstanceStatus::Failed(e.to_string()));
                error!(instance = %instance.id, "plugin instance failed: too many consecutive handler errors");
            }
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(instance = %instance.id, panic = %message, "plugin handler panicked");
            if instance.failures.record_failure() {
                instance.set_status(InstanceStatus::Failed(format!("panicked: {message}")));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn spawn_sandbox_task(inner: Arc<ManagerInner>, instance: Arc<PluginInstance>, monitor: Arc<SandboxMonitor>) {
    tokio::spawn(async move {
        let pid = sysinfo::Pid::from(std::process::id() as usize);
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            interval.tick().await;
            if instance.status() != InstanceStatus::Running {
                break;
            }
            let mut system = sysinfo::System::new_all();
            system.refresh_all();
            let memory = system.process(pid).map(|p| p.memory()).unwrap_or(0);
            if monitor.sample(memory) {
                warn!(instance = %instance.id, "resource sandbox sustained violation, stopping instance");
                instance.cancel.cancel();
                let _ = tokio::time::timeout(STOP_TIMEOUT, instance.plugin.stop()).await;
                instance.set_status(InstanceStatus::Failed("resource sandbox limit exceeded".to_string()));
                break;
            }
        }
        inner.sandboxes.remove(&instance.id);
    });
}

/// Declares the `required_features`/`required_permissions` an instance's
/// own definition carries, useful for an operator UI that lists what a
/// running instance was granted rather than what its manifest asked for.
pub fn declared_permissions(definition: &PluginDefinition) -> HashSet<String> {
    definition.required_permissions.clone()
}
