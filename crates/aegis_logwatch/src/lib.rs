//! Squad log tailing and parsing: watches local and remote log sources,
//! turns raw lines into structured events, and publishes them onto the
//! shared event bus.

pub mod error;
pub mod events;
pub mod manager;
pub mod parser;
pub mod shipper;
pub mod source;
pub mod watcher;

pub use error::LogWatchError;
pub use manager::LogWatcherManager;
pub use parser::{ChainCorrelator, ParsedEvent};
pub use shipper::ShipperHandle;
pub use source::{CursorStore, FileIdentity, LogSourceConfig, LogSourceKind, RemoteCredentials};
pub use watcher::WatcherHandle;
