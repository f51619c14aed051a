//! Per-instance key/value storage capability.
//!
//! There is no SQL engine wired into this core — the permissions/RBAC
//! database schema that would host one is explicitly out of scope.
//! `get`/`set`/`delete` are backed by an in-memory, last-writer-wins map
//! namespaced by instance id.
//!
//! `execute_query` is deliberately left unwired: §5 documents it as the
//! escape hatch a plugin needing read-modify-write atomicity reaches for,
//! but that only means something once a real SQL store backs
//! `StateStore` (see DESIGN.md / SPEC_FULL.md §4.4 for the decision to
//! leave it that way here). It returns a structured `Unsupported` error
//! rather than silently no-op'ing, so a plugin written against the full
//! capability interface fails loudly instead of losing writes.

use async_trait::async_trait;
use serde_json::Value;

use super::ApiCore;
use crate::error::PluginError;

#[async_trait]
pub trait DatabaseApi: Send + Sync {
    async fn get_plugin_data(&self, key: &str) -> Result<Option<Value>, PluginError>;
    async fn set_plugin_data(&self, key: &str, value: Value) -> Result<(), PluginError>;
    async fn delete_plugin_data(&self, key: &str) -> Result<(), PluginError>;
    async fn execute_query(&self, query: &str, args: Vec<Value>) -> Result<Vec<Value>, PluginError>;
}

pub(crate) struct DatabaseApiImpl(pub(crate) ApiCore);

#[async_trait]
impl DatabaseApi for DatabaseApiImpl {
    async fn get_plugin_data(&self, key: &str) -> Result<Option<Value>, PluginError> {
        let manager = self.0.manager()?;
        manager.state.get(self.0.instance_id, key).await
    }

    async fn set_plugin_data(&self, key: &str, value: Value) -> Result<(), PluginError> {
        let manager = self.0.manager()?;
        manager.state.set(self.0.instance_id, key, value).await
    }

    async fn delete_plugin_data(&self, key: &str) -> Result<(), PluginError> {
        let manager = self.0.manager()?;
        manager.state.delete(self.0.instance_id, key).await
    }

    async fn execute_query(&self, _query: &str, _args: Vec<Value>) -> Result<Vec<Value>, PluginError> {
        self.0.manager()?;
        Err(PluginError::Unsupported(
            "no query engine is wired into this core; use get/set/delete_plugin_data".to_string(),
        ))
    }
}
