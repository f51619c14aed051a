//! Per-instance runtime state: identity, status machine, copy-on-write
//! config, and the consecutive-failure tracker that feeds the `Failed`
//! transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use aegis_event_bus::{LogLevel, ServerId};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::definition::PluginDefinition;
use crate::plugin::Plugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `Stopped -> Starting -> Running -> Stopping -> Stopped`; `Failed` is
/// reachable from any state and only an explicit operator action or
/// `remove_instance` clears it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed(String),
}

/// Swaps the whole config map under a single lock rather than mutating
/// entries in place, so a handler mid-flight with a cloned `Arc` never
/// observes a half-applied `update_config`.
pub(crate) struct ConfigCell(RwLock<Arc<HashMap<String, Value>>>);

impl ConfigCell {
    pub(crate) fn new(initial: HashMap<String, Value>) -> Self {
        Self(RwLock::new(Arc::new(initial)))
    }

    pub(crate) fn get(&self) -> Arc<HashMap<String, Value>> {
        self.0.read().unwrap().clone()
    }

    pub(crate) fn swap(&self, new: HashMap<String, Value>) {
        *self.0.write().unwrap() = Arc::new(new);
    }
}

const FAILURE_WINDOW: Duration = Duration::from_secs(60);
const FAILURE_THRESHOLD: u32 = 3;

/// Three consecutive `handle_event` failures inside a 60s window push an
/// instance to `Failed`; a success anywhere in the window resets the count.
pub(crate) struct FailureTracker {
    consecutive: AtomicU32,
    window_start: RwLock<Option<Instant>>,
}

impl FailureTracker {
    fn new() -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            window_start: RwLock::new(None),
        }
    }

    /// Returns true if this failure should trip the instance to `Failed`.
    pub(crate) fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window_start.write().unwrap();
        let expired = window
            .map(|start| now.duration_since(start) > FAILURE_WINDOW)
            .unwrap_or(true);
        if expired {
            *window = Some(now);
            self.consecutive.store(1, Ordering::SeqCst);
            return 1 >= FAILURE_THRESHOLD;
        }
        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        count >= FAILURE_THRESHOLD
    }

    pub(crate) fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
        *self.window_start.write().unwrap() = None;
    }
}

pub struct PluginInstance {
    pub id: InstanceId,
    pub definition: Arc<PluginDefinition>,
    pub server_id: ServerId,
    /// Custom (dynamically loaded) instances get a resource sandbox and a
    /// feature-gated API surface; built-in instances get neither.
    pub is_dynamic: bool,
    pub(crate) config: ConfigCell,
    status: RwLock<InstanceStatus>,
    pub(crate) cancel: CancellationToken,
    pub(crate) failures: FailureTracker,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) log_level: RwLock<LogLevel>,
}

impl PluginInstance {
    pub(crate) fn new(
        definition: Arc<PluginDefinition>,
        server_id: ServerId,
        is_dynamic: bool,
        config: HashMap<String, Value>,
        plugin: Arc<dyn Plugin>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            definition,
            server_id,
            is_dynamic,
            config: ConfigCell::new(config),
            status: RwLock::new(InstanceStatus::Stopped),
            cancel: CancellationToken::new(),
            failures: FailureTracker::new(),
            plugin,
            log_level: RwLock::new(LogLevel::Info),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.status.read().unwrap().clone()
    }

    pub(crate) fn set_status(&self, status: InstanceStatus) {
        *self.status.write().unwrap() = status;
    }

    pub fn config(&self) -> Arc<HashMap<String, Value>> {
        self.config.get()
    }

    pub fn log_level(&self) -> LogLevel {
        *self.log_level.read().unwrap()
    }
}
