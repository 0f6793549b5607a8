//! Tunnel configuration types
//!
//! A [`TunnelConfig`] is resolved once (see `portway-settings`) and then
//! frozen for the lifetime of a session. Validation happens here so every
//! entry point, CLI or library, rejects the same inputs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

/// Default read buffer per relay direction
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Upper bound for the relay buffer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default bounded wait for accept and readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default time `stop()` waits for live relays before aborting them
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default connect/write timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Complete, validated description of one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Where inbound connections come from
    pub inbound: InboundMode,

    /// Port to listen on locally, or to register for forwarding on the SSH host.
    pub local_port: u16,

    /// Destination every accepted connection is relayed to
    pub remote_host: String,

    /// Destination port
    pub remote_port: u16,

    /// Connect timeout (SSH and destination) and relay write deadline
    pub timeout: Duration,

    /// Relay tuning
    pub relay: RelaySettings,
}

impl TunnelConfig {
    /// Build a config that listens on `127.0.0.1:local_port`.
    pub fn listen(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            inbound: InboundMode::Listen {
                bind_host: "127.0.0.1".to_string(),
            },
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            timeout: DEFAULT_TIMEOUT,
            relay: RelaySettings::default(),
        }
    }

    /// Build a config that registers `local_port` as a remote forward on `ssh`.
    pub fn remote_forward(
        ssh: SshTarget,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            inbound: InboundMode::RemoteForward {
                ssh,
                bind_address: String::new(),
            },
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            timeout: DEFAULT_TIMEOUT,
            relay: RelaySettings::default(),
        }
    }

    /// Check every field invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_port("local_port", u32::from(self.local_port))?;
        check_port("remote_port", u32::from(self.remote_port))?;

        if self.remote_host.trim().is_empty() {
            return Err(ConfigError::MissingField("remote_host"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }

        if let InboundMode::RemoteForward { ssh, .. } = &self.inbound {
            ssh.validate()?;
        }

        self.relay.validate()
    }

    /// Destination in `host:port` form
    pub fn destination(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    /// True when the inbound side is an SSH remote forward
    pub fn is_remote_forward(&self) -> bool {
        matches!(self.inbound, InboundMode::RemoteForward { .. })
    }
}

/// Reject ports outside `[1, 65535]`.
///
/// Takes a wide integer so callers parsing untrusted input can report the
/// original value instead of a truncated one.
pub fn check_port(field: &'static str, value: u32) -> Result<u16, ConfigError> {
    if (1..=u32::from(u16::MAX)).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ConfigError::PortOutOfRange { field, value })
    }
}

/// Inbound connection source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMode {
    /// Bind and listen on `bind_host:local_port`
    Listen { bind_host: String },

    /// Authenticate to `ssh` and ask it to forward `bind_address:local_port` back to us
    RemoteForward { ssh: SshTarget, bind_address: String },
}

/// SSH endpoint and credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            credential,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh_host"));
        }
        check_port("ssh_port", u32::from(self.port))?;
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingField("ssh_user"));
        }
        match &self.credential {
            Credential::Password(p) if p.is_empty() => Err(ConfigError::MissingField("ssh_password")),
            Credential::KeyFile { path, .. } if path.as_os_str().is_empty() => {
                Err(ConfigError::MissingField("ssh_key_file"))
            }
            _ => Ok(()),
        }
    }

    /// `host:port` for logs
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("credential", &self.credential)
            .finish()
    }
}

/// SSH authentication secret
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Relay tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Bytes read per direction per poll
    pub buffer_size: usize,

    /// Bounded wait for accept and readiness polls
    pub poll_interval: Duration,

    /// Terminate a relay after this long without traffic in either direction
    pub idle_timeout: Option<Duration>,

    /// How long `stop()` lets live relays finish before aborting them
    pub drain_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl RelaySettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if matches!(self.idle_timeout, Some(d) if d.is_zero()) {
            return Err(ConfigError::ZeroDuration("idle_timeout"));
        }
        Ok(())
    }
}
