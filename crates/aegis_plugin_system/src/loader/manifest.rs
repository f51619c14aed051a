//! The manifest a custom plugin binary ships alongside: everything the
//! loader needs to verify and load it before it is registered.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    /// `crate_version:rust_version`-style compatibility string, checked
    /// against the host's supported SDK range the same way the dynamic
    /// library's own ABI is checked.
    pub sdk_version: String,
    #[serde(default)]
    pub required_features: HashSet<String>,
    #[serde(default)]
    pub required_permissions: HashSet<String>,
    #[serde(default)]
    pub allow_multiple_instances: bool,
    #[serde(default)]
    pub long_running: bool,
}
