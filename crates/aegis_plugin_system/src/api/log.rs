//! Structured logging capability, honoring each instance's configured
//! minimum log level.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use aegis_event_bus::LogLevel;

use super::ApiCore;

pub trait LogApi: Send + Sync {
    fn debug(&self, message: &str, fields: Value);
    fn info(&self, message: &str, fields: Value);
    fn warn(&self, message: &str, fields: Value);
    fn error(&self, message: &str, fields: Value);
}

pub(crate) struct LogApiImpl(pub(crate) ApiCore);

impl LogApiImpl {
    fn enabled(&self, level: LogLevel) -> bool {
        let Ok(manager) = self.0.manager() else {
            return false;
        };
        let Some(instance) = manager.instances.get(&self.0.instance_id) else {
            return false;
        };
        level >= instance.log_level()
    }
}

impl LogApi for LogApiImpl {
    fn debug(&self, message: &str, fields: Value) {
        if self.enabled(LogLevel::Debug) {
            debug!(instance = %self.0.instance_id, %fields, "{message}");
        }
    }

    fn info(&self, message: &str, fields: Value) {
        if self.enabled(LogLevel::Info) {
            info!(instance = %self.0.instance_id, %fields, "{message}");
        }
    }

    fn warn(&self, message: &str, fields: Value) {
        if self.enabled(LogLevel::Warn) {
            warn!(instance = %self.0.instance_id, %fields, "{message}");
        }
    }

    fn error(&self, message: &str, fields: Value) {
        if self.enabled(LogLevel::Error) {
            error!(instance = %self.0.instance_id, %fields, "{message}");
        }
    }
}
