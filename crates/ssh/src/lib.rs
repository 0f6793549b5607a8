//! Portway SSH
//!
//! Authentication collaborator for remote-forward tunnels.
//!
//! ## Components
//!
//! - **Connector**: opens and authenticates a [`Transport`]
//! - **Transport**: registers and cancels remote port forwards, closes the session
//! - **ForwardListener**: yields forwarded channels with a bounded wait
//! - **SshConnector**: `russh` implementation of the above
//!
//! ## Host keys
//!
//! Unknown hosts are accepted with a warning; keys that conflict with an
//! existing `known_hosts` entry are rejected. See [`hostkey`].

mod client;
pub mod hostkey;
mod transport;

pub use client::SshConnector;
pub use transport::{
    forward_queue, ChannelForwardListener, Connector, ForwardListener, ForwardSender,
    ForwardedChannel, Transport,
};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Host key for {0} rejected")]
    HostKeyRejected(String),

    #[error("Authentication rejected for user {0}")]
    AuthRejected(String),

    #[error("Failed to load key file: {0}")]
    KeyFile(String),

    #[error("Remote forward rejected: {0}")]
    Forward(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;
