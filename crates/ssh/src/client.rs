//! russh-backed connector

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, Disconnect};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use portway_core::{Credential, SshTarget};

use crate::hostkey;
use crate::transport::{
    forward_queue, ChannelForwardListener, Connector, ForwardListener, ForwardSender,
    ForwardedChannel, Transport,
};
use crate::{Result, SshError};

/// Forwarded channels waiting for the acceptor
const FORWARD_QUEUE_CAPACITY: usize = 128;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Handler (russh callbacks)
// ---------------------------------------------------------------------------

struct ClientHandler {
    host: String,
    port: u16,
    forwarded_tx: ForwardSender,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(hostkey::verify(&self.host, self.port, server_public_key))
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        let originator = format!("{}:{}", originator_address, originator_port);
        debug!(
            "Forwarded connection on {}:{} from {}",
            connected_address, connected_port, originator
        );

        let forwarded = ForwardedChannel {
            stream: Box::new(channel.into_stream()),
            originator,
        };

        // Never block the session loop on a slow acceptor
        match self.forwarded_tx.try_send(forwarded) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Forward queue full, dropping connection from {}", dropped.originator);
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!("No forward listener, dropping connection from {}", dropped.originator);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Connects with `russh`, using password or key-file authentication.
///
/// SSH agents and implicit `~/.ssh/id_*` discovery are not consulted.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &SshTarget, timeout: Duration) -> Result<Box<dyn Transport>> {
        let transport = tokio::time::timeout(timeout, open_transport(target))
            .await
            .map_err(|_| SshError::Timeout(timeout))??;
        Ok(Box::new(transport))
    }
}

async fn open_transport(target: &SshTarget) -> Result<SshTransport> {
    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        nodelay: true,
        ..Default::default()
    });

    let (forwarded_tx, listener) = forward_queue(FORWARD_QUEUE_CAPACITY);
    let handler = ClientHandler {
        host: target.host.clone(),
        port: target.port,
        forwarded_tx,
    };

    info!("Connecting to SSH host {}...", target.authority());
    let mut handle = client::connect(config, (target.host.as_str(), target.port), handler)
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => SshError::HostKeyRejected(target.authority()),
            other => SshError::Connect {
                target: target.authority(),
                reason: other.to_string(),
            },
        })?;

    authenticate(&mut handle, target).await?;
    info!(user = %target.user, "SSH authentication successful");

    Ok(SshTransport {
        handle,
        listener: Some(listener),
        closed: false,
    })
}

async fn authenticate(handle: &mut client::Handle<ClientHandler>, target: &SshTarget) -> Result<()> {
    let result = match &target.credential {
        Credential::Password(password) => {
            handle
                .authenticate_password(target.user.as_str(), password.as_str())
                .await?
        }
        Credential::KeyFile { path, passphrase } => {
            let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                .map_err(|e| SshError::KeyFile(format!("{}: {}", path.display(), e)))?;
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle.authenticate_publickey(target.user.as_str(), key).await?
        }
    };

    if result.success() {
        Ok(())
    } else {
        Err(SshError::AuthRejected(target.user.clone()))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct SshTransport {
    handle: client::Handle<ClientHandler>,
    /// Handed out on the first forward registration
    listener: Option<ChannelForwardListener>,
    closed: bool,
}

#[async_trait]
impl Transport for SshTransport {
    async fn request_forward(
        &mut self,
        bind_address: &str,
        port: u16,
    ) -> Result<(u16, Box<dyn ForwardListener>)> {
        if self.closed {
            return Err(SshError::TransportClosed);
        }
        let Some(listener) = self.listener.take() else {
            return Err(SshError::Forward("a forward is already registered".to_string()));
        };

        let assigned = match self.handle.tcpip_forward(bind_address, u32::from(port)).await {
            Ok(assigned) => assigned,
            Err(e) => {
                self.listener = Some(listener);
                return Err(SshError::Forward(e.to_string()));
            }
        };
        let bound = if assigned == 0 { port } else { assigned as u16 };

        info!(
            bind = %format!("{}:{}", display_bind(bind_address), bound),
            "Remote forward registered"
        );
        Ok((bound, Box::new(listener)))
    }

    async fn cancel_forward(&mut self, bind_address: &str, port: u16) -> Result<()> {
        if self.closed {
            return Err(SshError::TransportClosed);
        }
        self.handle
            .cancel_tcpip_forward(bind_address, u32::from(port))
            .await?;
        debug!("Remote forward on port {} cancelled", port);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

fn display_bind(bind_address: &str) -> &str {
    if bind_address.is_empty() {
        "*"
    } else {
        bind_address
    }
}
