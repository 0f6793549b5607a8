use thiserror::Error;

/// Invalid configuration; raised before any connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {field}: {value} is outside 1-65535")]
    PortOutOfRange { field: &'static str, value: u32 },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid buffer size: {0}")]
    BufferSize(usize),
}

/// Failure to bring a tunnel up.
///
/// Only `start()` returns these; per-connection and shutdown failures are
/// logged where they happen and never reach the caller.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tunnel already running")]
    AlreadyRunning,

    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("Failed to register remote forward on port {port}: {reason}")]
    Forward { port: u16, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TunnelError>;
