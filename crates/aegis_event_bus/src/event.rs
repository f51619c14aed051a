//! The event envelope carried through the bus.

use crate::types::{monotonic_millis, EventId, ServerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifies the subsystem that produced an event, used for the bus's
/// per-publisher ordering guarantee ("same ServerId+component").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Producer {
    Rcon,
    LogWatcher,
    LogShipper,
    Plugin,
    System,
}

/// A single published event: id, origin server, type tag, and a structured
/// payload carried as JSON so the bus never needs to know concrete plugin
/// event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub server_id: ServerId,
    pub producer: Producer,
    pub type_tag: String,
    pub payload: serde_json::Value,
    pub timestamp: u64,
    /// Squad's log correlation token, when the event originated from a
    /// chain-correlated log line pair.
    pub chain_id: Option<String>,
}

impl Event {
    pub fn new(
        server_id: ServerId,
        producer: Producer,
        type_tag: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            server_id,
            producer,
            type_tag: type_tag.into(),
            payload,
            timestamp: monotonic_millis(),
            chain_id: None,
        }
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    /// Deserializes the payload into a concrete typed event. Consumers that
    /// care about a specific event's shape use this instead of matching on
    /// `payload` directly.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
