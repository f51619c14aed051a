//! Plugin definition registry: built-in plugins compiled into this
//! process, and custom plugins loaded dynamically at runtime.
//!
//! Built-in registration is frozen once the manager starts dispatching
//! events — late registration would let a plugin's declared event types
//! silently miss the window where the manager first builds its dispatch
//! index. Dynamic (custom) entries are never frozen: they can arrive any
//! time an administrator uploads one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::definition::PluginDefinition;
use crate::error::PluginError;
use crate::plugin::Plugin;

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

struct RegistryEntry {
    definition: Arc<PluginDefinition>,
    factory: PluginFactory,
    is_dynamic: bool,
}

pub struct PluginRegistry {
    entries: DashMap<String, RegistryEntry>,
    frozen: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Called once, by the supervisor, after every built-in plugin has
    /// registered and before the dispatch loop starts.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn register_builtin(&self, definition: PluginDefinition, factory: PluginFactory) -> Result<(), PluginError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(PluginError::Runtime(
                "builtin plugin registry is frozen; register before the manager starts".to_string(),
            ));
        }
        self.entries.insert(
            definition.id.clone(),
            RegistryEntry {
                definition: Arc::new(definition),
                factory,
                is_dynamic: false,
            },
        );
        Ok(())
    }

    /// Dynamic registration is not gated by `freeze` — custom plugins can
    /// be uploaded and loaded at any time.
    pub(crate) fn register_dynamic(&self, definition: PluginDefinition, factory: PluginFactory) {
        self.entries.insert(
            definition.id.clone(),
            RegistryEntry {
                definition: Arc::new(definition),
                factory,
                is_dynamic: true,
            },
        );
    }

    pub(crate) fn unregister_dynamic(&self, plugin_id: &str) {
        self.entries.remove_if(plugin_id, |_, entry| entry.is_dynamic);
    }

    pub(crate) fn get(&self, plugin_id: &str) -> Option<(Arc<PluginDefinition>, PluginFactory, bool)> {
        self.entries
            .get(plugin_id)
            .map(|e| (e.definition.clone(), e.factory.clone(), e.is_dynamic))
    }

    pub fn list(&self) -> Vec<Arc<PluginDefinition>> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
