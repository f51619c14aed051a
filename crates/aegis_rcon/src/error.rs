use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("command timed out")]
    Timeout,

    #[error("retryable: {0}")]
    Retryable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server already configured: {0}")]
    ServerAlreadyExists(String),
}
