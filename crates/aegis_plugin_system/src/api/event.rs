//! Publish capability: lets a plugin feed its own derived events back onto
//! the bus under `Producer::Plugin`.

use serde_json::Value;

use aegis_event_bus::{Event, Producer};

use super::ApiCore;

pub trait EventApi: Send + Sync {
    fn publish(&self, type_tag: &str, payload: Value);
}

pub(crate) struct EventApiImpl(pub(crate) ApiCore);

impl EventApi for EventApiImpl {
    fn publish(&self, type_tag: &str, payload: Value) {
        let Ok(manager) = self.0.manager() else {
            return;
        };
        manager.bus.publish(Event::new(self.0.server_id, Producer::Plugin, type_tag, payload));
    }
}
