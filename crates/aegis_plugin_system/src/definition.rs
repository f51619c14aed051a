//! Static plugin metadata: what a plugin declares about itself, as
//! opposed to the runtime state tracked per running instance.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::schema::ConfigSchema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub id: String,
    pub version: String,
    pub author: String,
    pub config_schema: ConfigSchema,
    /// Event type tags this plugin wants delivered to `handle_event`.
    pub declared_event_types: HashSet<String>,
    /// Connector ids this plugin needs `Running` before it can start.
    pub declared_required_connectors: HashSet<String>,
    /// If false, at most one instance of this plugin may run per
    /// `ServerId` (not process-wide, per the resolved open question).
    pub allow_multiple_instances: bool,
    /// Long-running plugins are exempt from the idle-instance reap policy
    /// a supervisor may apply; purely informational at this layer.
    pub long_running: bool,
    /// SDK capability names a dynamically loaded plugin must be granted
    /// before its feature gateway exposes the matching API.
    #[serde(default)]
    pub required_features: HashSet<String>,
    #[serde(default)]
    pub required_permissions: HashSet<String>,
}

impl PluginDefinition {
    pub fn requires_feature(&self, feature: &str) -> bool {
        self.required_features.contains(feature)
    }
}
