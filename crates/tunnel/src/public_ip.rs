//! Public IP discovery for the "tunnel established" announcement

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

pub const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PublicIpError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Empty response from {0}")]
    Empty(String),
}

/// Fetch this host's public address from a plain-text echo service.
pub async fn lookup(url: &str) -> Result<String, PublicIpError> {
    let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let ip = body.trim();
    if ip.is_empty() {
        return Err(PublicIpError::Empty(url.to_string()));
    }
    Ok(ip.to_string())
}

/// Log where the tunnel can be reached. A failed lookup is logged, never fatal.
pub async fn announce(url: &str, port: u16) -> Option<String> {
    match lookup(url).await {
        Ok(ip) => {
            info!("Tunnel established: http://{}:{}", ip, port);
            Some(ip)
        }
        Err(e) => {
            error!("Could not get public IP: {}", e);
            None
        }
    }
}
