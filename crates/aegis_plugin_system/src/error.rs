use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("plugin config invalid: {0}")]
    ConfigInvalid(String),

    #[error("plugin execution error: {0}")]
    ExecutionError(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin runtime error: {0}")]
    Runtime(String),

    #[error("capability not supported by this core: {0}")]
    Unsupported(String),

    #[error("plugin signature invalid")]
    SignatureInvalid,

    #[error("plugin sdk version mismatch: plugin requires {required}, host is {host}")]
    SdkVersionMismatch { required: String, host: String },

    #[error("plugin permission denied: {0}")]
    PermissionDenied(String),

    #[error("required connector is not running: {0}")]
    ConnectorNotRunning(String),

    #[error("plugin instance already exists: {0}")]
    InstanceAlreadyExists(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
