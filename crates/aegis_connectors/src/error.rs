use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector not found: {0}")]
    NotFound(String),

    #[error("connector not running: {0}")]
    NotRunning(String),

    #[error("connector already running: {0}")]
    AlreadyRunning(String),

    #[error("connector transport error: {0}")]
    Transport(String),
}
