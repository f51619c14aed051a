//! Pluggable persisted-state backend for the per-instance KV namespace.
//!
//! spec.md's persisted-state list (definitions, instances, custom plugin
//! records, trusted keys, permission grants, sandbox configs) is already
//! owned by the structures that use it directly — `PluginRegistry`,
//! `ManagerInner::instances`, `PluginLoader`'s records/manifests,
//! `KeyRegistry`. The one piece plugins themselves read and write through
//! a capability API, the per-instance KV namespace `DatabaseApi` exposes,
//! sits behind this trait instead of a bare `DashMap` so a durable backend
//! can replace the in-memory one without touching `ManagerInner` or the
//! API layer.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::PluginError;
use crate::instance::InstanceId;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, instance_id: InstanceId, key: &str) -> Result<Option<Value>, PluginError>;
    async fn set(&self, instance_id: InstanceId, key: &str, value: Value) -> Result<(), PluginError>;
    async fn delete(&self, instance_id: InstanceId, key: &str) -> Result<(), PluginError>;

    /// Drops every key belonging to `instance_id`. Called when an instance
    /// is permanently removed rather than just stopped.
    fn clear_instance(&self, instance_id: InstanceId);
}

/// The in-memory implementation this core ships. The durable store it
/// would front in a full deployment is out of scope here.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: DashMap<(InstanceId, String), Value>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, instance_id: InstanceId, key: &str) -> Result<Option<Value>, PluginError> {
        Ok(self.entries.get(&(instance_id, key.to_string())).map(|e| e.value().clone()))
    }

    async fn set(&self, instance_id: InstanceId, key: &str, value: Value) -> Result<(), PluginError> {
        self.entries.insert((instance_id, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, instance_id: InstanceId, key: &str) -> Result<(), PluginError> {
        self.entries.remove(&(instance_id, key.to_string()));
        Ok(())
    }

    fn clear_instance(&self, instance_id: InstanceId) {
        self.entries.retain(|(id, _), _| *id != instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = InMemoryStateStore::new();
        let id = InstanceId::new();
        store.set(id, "score", serde_json::json!(42)).await.unwrap();
        assert_eq!(store.get(id, "score").await.unwrap(), Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = InMemoryStateStore::new();
        let id = InstanceId::new();
        store.set(id, "k", serde_json::json!(1)).await.unwrap();
        store.delete(id, "k").await.unwrap();
        assert_eq!(store.get(id, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_instance_removes_only_that_instances_keys() {
        let store = InMemoryStateStore::new();
        let a = InstanceId::new();
        let b = InstanceId::new();
        store.set(a, "k", serde_json::json!(1)).await.unwrap();
        store.set(b, "k", serde_json::json!(2)).await.unwrap();
        store.clear_instance(a);
        assert_eq!(store.get(a, "k").await.unwrap(), None);
        assert_eq!(store.get(b, "k").await.unwrap(), Some(serde_json::json!(2)));
    }
}
