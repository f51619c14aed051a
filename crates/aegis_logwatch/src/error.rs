use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogWatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sftp error: {0}")]
    Sftp(String),

    #[error("ftp error: {0}")]
    Ftp(String),

    #[error("source rotated")]
    Rotated,

    #[error("log shipper authentication failed")]
    ShipperAuth,

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server already configured: {0}")]
    ServerAlreadyExists(String),
}
