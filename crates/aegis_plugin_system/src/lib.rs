//! Loads, runs, and supervises plugin instances: built-in plugins
//! compiled into this process and custom plugins uploaded as signed
//! dynamic libraries, each wired to the capability APIs its declared
//! features and permissions allow.

mod api;
mod definition;
mod error;
mod instance;
mod loader;
mod manager;
mod plugin;
mod registry;
mod sandbox;
mod schema;
mod state;

pub use api::{ConnectorApi, DatabaseApi, EventApi, LogApi, PluginApis, RconApi, ServerApi};
pub use definition::PluginDefinition;
pub use error::PluginError;
pub use instance::{InstanceId, InstanceStatus, PluginInstance};
pub use loader::{BinaryStore, CustomPluginRecord, HttpObjectStore, KeyRegistry, LoaderSafetyConfig, LocalFsStore, PluginLoader, PluginManifest, HOST_SDK_VERSION};
pub use manager::PluginManager;
pub use plugin::{Plugin, PluginContext};
pub use registry::{PluginFactory, PluginRegistry};
pub use sandbox::{SandboxLimits, SandboxMonitor, WorkerGuard, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_MAX_WORKERS, SUSTAINED_VIOLATION_WINDOW};
pub use schema::{ConfigField, ConfigSchema, FieldKind};
pub use state::{InMemoryStateStore, StateStore};

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_connectors::ConnectorManager;
    use aegis_event_bus::{Event, EventBus, Producer, ServerId};
    use aegis_rcon::RconManager;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        handled: Arc<AtomicU32>,
        fail_next: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn definition(&self) -> PluginDefinition {
            PluginDefinition {
                id: "counting".to_string(),
                version: "1.0.0".to_string(),
                author: "test".to_string(),
                config_schema: ConfigSchema::default(),
                declared_event_types: HashSet::from(["chat".to_string()]),
                declared_required_connectors: HashSet::new(),
                allow_multiple_instances: false,
                long_running: false,
                required_features: HashSet::new(),
                required_permissions: HashSet::new(),
            }
        }

        async fn initialize(&self, _config: HashMap<String, serde_json::Value>, _apis: PluginApis) -> Result<(), PluginError> {
            Ok(())
        }

        async fn start(&self, _ctx: PluginContext) -> Result<(), PluginError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }

        async fn handle_event(&self, _event: Arc<Event>) -> Result<(), PluginError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PluginError::ExecutionError("boom".to_string()));
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn plugin_manager() -> PluginManager {
        let bus = EventBus::new();
        let rcon = Arc::new(RconManager::new(bus.clone()));
        let connectors = Arc::new(ConnectorManager::new());
        PluginManager::new(bus, rcon, connectors)
    }

    #[tokio::test]
    async fn dispatch_reaches_only_matching_server_and_event_type() {
        let manager = plugin_manager();
        let handled = Arc::new(AtomicU32::new(0));
        let fail_next = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let factory_handled = handled.clone();
        let factory_fail = fail_next.clone();
        manager
            .registry()
            .register_builtin(
                CountingPlugin {
                    handled: handled.clone(),
                    fail_next: fail_next.clone(),
                }
                .definition(),
                Arc::new(move || {
                    Arc::new(CountingPlugin {
                        handled: factory_handled.clone(),
                        fail_next: factory_fail.clone(),
                    }) as Arc<dyn Plugin>
                }),
            )
            .unwrap();

        let server_id = ServerId::new();
        let other_server = ServerId::new();
        let instance_id = manager.create_instance("counting", server_id, HashMap::new()).await.unwrap();
        manager.start_instance(instance_id).await.unwrap();

        manager.bus().publish(Event::new(server_id, Producer::Rcon, "chat", json!({"text": "hi"})));
        manager.bus().publish(Event::new(server_id, Producer::Rcon, "squad_created", json!({})));
        manager.bus().publish(Event::new(other_server, Producer::Rcon, "chat", json!({})));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_singleton_instance_is_rejected() {
        let manager = plugin_manager();
        manager
            .registry()
            .register_builtin(
                CountingPlugin {
                    handled: Arc::new(AtomicU32::new(0)),
                    fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                }
                .definition(),
                Arc::new(|| {
                    Arc::new(CountingPlugin {
                        handled: Arc::new(AtomicU32::new(0)),
                        fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                    }) as Arc<dyn Plugin>
                }),
            )
            .unwrap();

        let server_id = ServerId::new();
        manager.create_instance("counting", server_id, HashMap::new()).await.unwrap();
        let second = manager.create_instance("counting", server_id, HashMap::new()).await;
        assert!(matches!(second, Err(PluginError::InstanceAlreadyExists(_))));

        let other_server = ServerId::new();
        assert!(manager.create_instance("counting", other_server, HashMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let manager = plugin_manager();
        manager
            .registry()
            .register_builtin(
                CountingPlugin {
                    handled: Arc::new(AtomicU32::new(0)),
                    fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                }
                .definition(),
                Arc::new(|| {
                    Arc::new(CountingPlugin {
                        handled: Arc::new(AtomicU32::new(0)),
                        fail_next: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                    }) as Arc<dyn Plugin>
                }),
            )
            .unwrap();

        let instance_id = manager.create_instance("counting", ServerId::new(), HashMap::new()).await.unwrap();
        manager.start_instance(instance_id).await.unwrap();
        manager.start_instance(instance_id).await.unwrap();
        assert_eq!(manager.instance_status(instance_id).unwrap(), InstanceStatus::Running);

        manager.stop_instance(instance_id).await.unwrap();
        manager.stop_instance(instance_id).await.unwrap();
        assert_eq!(manager.instance_status(instance_id).unwrap(), InstanceStatus::Stopped);
    }

    struct OrderRecordingPlugin {
        seen: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Plugin for OrderRecordingPlugin {
        fn definition(&self) -> PluginDefinition {
            PluginDefinition {
                id: "order-recording".to_string(),
                version: "1.0.0".to_string(),
                author: "test".to_string(),
                config_schema: ConfigSchema::default(),
                declared_event_types: HashSet::from(["tick".to_string()]),
                declared_required_connectors: HashSet::new(),
                allow_multiple_instances: false,
                long_running: false,
                required_features: HashSet::new(),
                required_permissions: HashSet::new(),
            }
        }
        async fn initialize(&self, _c: HashMap<String, serde_json::Value>, _a: PluginApis) -> Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self, _ctx: PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn handle_event(&self, event: Arc<Event>) -> Result<(), PluginError> {
            let n: u32 = event.payload_as().unwrap();
            // A tiny stagger so that, were dispatch racing independently
            // spawned tasks against each other, an early event would have
            // a real chance of losing to a later one.
            tokio::time::sleep(std::time::Duration::from_millis(if n % 2 == 0 { 5 } else { 0 })).await;
            self.seen.lock().unwrap().push(n);
            Ok(())
        }
    }

    /// Boundary scenario (spec.md §5 / §8): handler invocations for a given
    /// `(instance, event-type)` pair must run in publish order, never out
    /// of order, even though the dispatch loop hands each event to its own
    /// worker task rather than awaiting the handler inline.
    #[tokio::test]
    async fn same_type_events_are_handled_in_publish_order() {
        let manager = plugin_manager();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let factory_seen = seen.clone();
        manager
            .registry()
            .register_builtin(
                OrderRecordingPlugin { seen: seen.clone() }.definition(),
                Arc::new(move || Arc::new(OrderRecordingPlugin { seen: factory_seen.clone() }) as Arc<dyn Plugin>),
            )
            .unwrap();

        let server_id = ServerId::new();
        let instance_id = manager.create_instance("order-recording", server_id, HashMap::new()).await.unwrap();
        manager.start_instance(instance_id).await.unwrap();

        for n in 0..20u32 {
            manager.bus().publish(Event::new(server_id, Producer::Rcon, "tick", json!(n)));
        }

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(*seen.lock().unwrap(), (0..20u32).collect::<Vec<_>>());
    }

    struct AlwaysFailPlugin {
        handled: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Plugin for AlwaysFailPlugin {
        fn definition(&self) -> PluginDefinition {
            PluginDefinition {
                id: "always-fail".to_string(),
                version: "1.0.0".to_string(),
                author: "test".to_string(),
                config_schema: ConfigSchema::default(),
                declared_event_types: HashSet::from(["chat".to_string()]),
                declared_required_connectors: HashSet::new(),
                allow_multiple_instances: false,
                long_running: false,
                required_features: HashSet::new(),
                required_permissions: HashSet::new(),
            }
        }
        async fn initialize(&self, _c: HashMap<String, serde_json::Value>, _a: PluginApis) -> Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self, _ctx: PluginContext) -> Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn handle_event(&self, _event: Arc<Event>) -> Result<(), PluginError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Err(PluginError::ExecutionError("always fails".to_string()))
        }
    }

    #[tokio::test]
    async fn three_consecutive_handler_failures_fail_the_instance() {
        let manager = plugin_manager();
        let handled = Arc::new(AtomicU32::new(0));
        let factory_handled = handled.clone();
        manager
            .registry()
            .register_builtin(
                AlwaysFailPlugin { handled: handled.clone() }.definition(),
                Arc::new(move || Arc::new(AlwaysFailPlugin { handled: factory_handled.clone() }) as Arc<dyn Plugin>),
            )
            .unwrap();

        let server_id = ServerId::new();
        let instance_id = manager.create_instance("always-fail", server_id, HashMap::new()).await.unwrap();
        manager.start_instance(instance_id).await.unwrap();

        for _ in 0..3 {
            manager.bus().publish(Event::new(server_id, Producer::Rcon, "chat", json!({})));
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert!(matches!(manager.instance_status(instance_id).unwrap(), InstanceStatus::Failed(_)));
        assert_eq!(handled.load(Ordering::SeqCst), 3);
    }
}
