//! Host key policy: warn on unknown, proceed.
//!
//! A key that matches `~/.ssh/known_hosts` is accepted silently. A host with
//! no entry (or an unreadable known_hosts file) is accepted with a warning
//! carrying the key fingerprint. A key that conflicts with an existing entry
//! is rejected.
//!
//! This is weaker than strict checking: a first connection to an unknown
//! host is open to interception.

use russh::keys::{HashAlg, PublicKey};
use tracing::{error, info, warn};

/// Outcome of looking a server key up in known_hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyCheck {
    Known,
    Unknown,
    Changed { line: usize },
    Unverifiable(String),
}

impl HostKeyCheck {
    pub fn from_known_hosts(result: Result<bool, russh::keys::Error>) -> Self {
        match result {
            Ok(true) => Self::Known,
            Ok(false) => Self::Unknown,
            Err(russh::keys::Error::KeyChanged { line }) => Self::Changed { line },
            Err(e) => Self::Unverifiable(e.to_string()),
        }
    }

    /// Whether the connection may proceed
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Changed { .. })
    }
}

/// Check `key` for `host:port` against the user's known_hosts and apply the policy.
pub fn verify(host: &str, port: u16, key: &PublicKey) -> bool {
    let check = HostKeyCheck::from_known_hosts(russh::keys::check_known_hosts(host, port, key));
    let fingerprint = key.fingerprint(HashAlg::Sha256);

    match &check {
        HostKeyCheck::Known => {
            info!("Host key for {}:{} verified", host, port);
        }
        HostKeyCheck::Unknown => {
            warn!(
                "Unknown host key for {}:{} ({} {}), proceeding",
                host,
                port,
                key.algorithm(),
                fingerprint
            );
        }
        HostKeyCheck::Unverifiable(reason) => {
            warn!(
                "Could not check host key for {}:{} ({}): {}, proceeding",
                host, port, fingerprint, reason
            );
        }
        HostKeyCheck::Changed { line } => {
            error!(
                "HOST KEY MISMATCH for {}:{}: received {} conflicts with known_hosts line {}",
                host, port, fingerprint, line
            );
        }
    }

    check.is_admitted()
}
