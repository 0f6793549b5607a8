//! Portway Settings
//!
//! Layered configuration for the `portway` binary.
//!
//! ## Precedence
//!
//! Built-in defaults, then the JSON settings file, then `PORTWAY_*`
//! environment variables. Command-line flags are applied on top by the CLI.
//!
//! ## Usage
//!
//! ```no_run
//! use portway_settings::Settings;
//!
//! let settings = Settings::load(None)?;
//! let config = settings.tunnel_config()?;
//! # Ok::<(), portway_settings::SettingsError>(())
//! ```

mod config;

pub use config::{Mode, Settings, ENV_PREFIX};

use std::path::PathBuf;

use portway_core::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// `$XDG_CONFIG_HOME/portway`, else `~/.config/portway`
pub fn default_config_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("portway")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
