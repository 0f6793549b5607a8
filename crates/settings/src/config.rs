//! Settings file and environment layering

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use portway_core::{
    check_port, ConfigError, Credential, InboundMode, RelaySettings, SshTarget, TunnelConfig,
    DEFAULT_BUFFER_SIZE,
};

use crate::{default_settings_path, Result, SettingsError};

/// Prefix for environment overrides, e.g. `PORTWAY_LOCAL_PORT`
pub const ENV_PREFIX: &str = "PORTWAY_";

/// How inbound connections arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Listen on a local port
    Listen,
    /// Register a remote forward on an SSH server
    #[default]
    Forward,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "listen" => Ok(Self::Listen),
            "forward" => Ok(Self::Forward),
            other => Err(format!("expected 'listen' or 'forward', got '{}'", other)),
        }
    }
}

/// Every user-tunable knob.
///
/// Ports are held as `u32` so values such as `70000` from a file or the
/// environment are reported as out of range instead of wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub mode: Mode,

    pub ssh_host: Option<String>,
    pub ssh_port: u32,
    pub ssh_user: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_key_file: Option<PathBuf>,
    pub ssh_key_passphrase: Option<String>,

    pub local_port: u32,
    pub remote_host: String,
    pub remote_port: u32,

    /// Connect and write timeout in seconds
    pub timeout: u64,

    /// Listen mode bind address
    pub bind_host: String,

    /// Address the SSH server binds for the remote forward; empty means all interfaces
    pub forward_bind_address: String,

    pub buffer_size: usize,
    pub poll_interval_ms: u64,

    /// 0 disables the idle timeout
    pub idle_timeout_secs: u64,
    pub drain_timeout_secs: u64,

    pub public_ip_url: String,
    pub announce_public_ip: bool,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            ssh_host: None,
            ssh_port: 22,
            ssh_user: None,
            ssh_password: None,
            ssh_key_file: None,
            ssh_key_passphrase: None,
            local_port: 8080,
            remote_host: "127.0.0.1".to_string(),
            remote_port: 80,
            timeout: 30,
            bind_host: "127.0.0.1".to_string(),
            forward_bind_address: String::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval_ms: 1000,
            idle_timeout_secs: 0,
            drain_timeout_secs: 5,
            public_ip_url: "https://api.ipify.org".to_string(),
            announce_public_ip: true,
            config_path: None,
        }
    }
}

impl Settings {
    /// Defaults, then the settings file (default path when `None`), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_settings_path);
        let mut settings = Self::load_from(&path)?;
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            debug!("No settings file at {:?}, using defaults", path);
            Ok(Self {
                config_path: Some(path.to_path_buf()),
                ..Self::default()
            })
        }
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// File the settings were loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Apply `PORTWAY_<FIELD>` overrides. Other variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            let Some(field) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = field.to_ascii_lowercase();
            match field.as_str() {
                "mode" => self.mode = parse(&var, &value)?,
                "ssh_host" => self.ssh_host = Some(value),
                "ssh_port" => self.ssh_port = parse(&var, &value)?,
                "ssh_user" => self.ssh_user = Some(value),
                "ssh_password" => self.ssh_password = Some(value),
                "ssh_key_file" => self.ssh_key_file = Some(PathBuf::from(value)),
                "ssh_key_passphrase" => self.ssh_key_passphrase = Some(value),
                "local_port" => self.local_port = parse(&var, &value)?,
                "remote_host" => self.remote_host = value,
                "remote_port" => self.remote_port = parse(&var, &value)?,
                "timeout" => self.timeout = parse(&var, &value)?,
                "bind_host" => self.bind_host = value,
                "forward_bind_address" => self.forward_bind_address = value,
                "buffer_size" => self.buffer_size = parse(&var, &value)?,
                "poll_interval_ms" => self.poll_interval_ms = parse(&var, &value)?,
                "idle_timeout_secs" => self.idle_timeout_secs = parse(&var, &value)?,
                "drain_timeout_secs" => self.drain_timeout_secs = parse(&var, &value)?,
                "public_ip_url" => self.public_ip_url = value,
                "announce_public_ip" => self.announce_public_ip = parse(&var, &value)?,
                _ => {
                    debug!("Ignoring unrecognised variable {}", var);
                    continue;
                }
            }
            debug!("Applied {} from environment", var);
        }
        Ok(())
    }

    /// True when forwarding over SSH with neither a password nor a key file
    pub fn needs_password(&self) -> bool {
        self.mode == Mode::Forward && self.ssh_password.is_none() && self.ssh_key_file.is_none()
    }

    /// Validate and convert into a [`TunnelConfig`].
    pub fn tunnel_config(&self) -> Result<TunnelConfig> {
        let local_port = check_port("local_port", self.local_port)?;
        let remote_port = check_port("remote_port", self.remote_port)?;

        let inbound = match self.mode {
            Mode::Listen => InboundMode::Listen {
                bind_host: self.bind_host.clone(),
            },
            Mode::Forward => InboundMode::RemoteForward {
                ssh: self.ssh_target()?,
                bind_address: self.forward_bind_address.clone(),
            },
        };

        let config = TunnelConfig {
            inbound,
            local_port,
            remote_host: self.remote_host.clone(),
            remote_port,
            timeout: Duration::from_secs(self.timeout),
            relay: RelaySettings {
                buffer_size: self.buffer_size,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                idle_timeout: (self.idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.idle_timeout_secs)),
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn ssh_target(&self) -> Result<SshTarget> {
        let port = check_port("ssh_port", self.ssh_port)?;
        let host = self
            .ssh_host
            .clone()
            .ok_or(ConfigError::MissingField("ssh_host"))?;
        let user = self
            .ssh_user
            .clone()
            .ok_or(ConfigError::MissingField("ssh_user"))?;

        // A key file wins over a password when both are set
        let credential = match (&self.ssh_key_file, &self.ssh_password) {
            (Some(path), _) => Credential::KeyFile {
                path: path.clone(),
                passphrase: self.ssh_key_passphrase.clone(),
            },
            (None, Some(password)) => Credential::Password(password.clone()),
            (None, None) => return Err(ConfigError::MissingField("ssh_password").into()),
        };

        Ok(SshTarget::new(host, port, user, credential))
    }
}

fn parse<T>(var: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SettingsError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
