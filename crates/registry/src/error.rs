use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("no server config registered for \"{0}\"")]
    ConfigMissing(String),

    #[error("invalid server config for \"{name}\": {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("failed to construct client for \"{name}\": {reason}")]
    ConstructFailed { name: String, reason: String },

    #[error("failed to start transport for \"{name}\": {reason}")]
    StartFailed { name: String, reason: String },

    #[error("handshake failed for \"{name}\": {reason}")]
    InitFailed { name: String, reason: String },

    #[error("initialization of \"{0}\" was cancelled")]
    Cancelled(String),

    #[error("downstream call to \"{server}\" failed: {reason}")]
    CallFailed { server: String, reason: String },

    #[error("downstream call to \"{0}\" timed out")]
    Timeout(String),
}
