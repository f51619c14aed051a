use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("subscription closed")]
    SubscriptionClosed,

    #[error("event bus is shut down")]
    Closed,
}
