//! Shared fixtures: echo servers, port helpers and an in-memory SSH transport

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use portway_core::{Credential, RelaySettings, SshTarget, TunnelConfig};
use portway_ssh::{
    forward_queue, Connector, ForwardListener, ForwardSender, ForwardedChannel, SshError,
    Transport,
};

// =============================================================================
// LOGGING
// =============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// =============================================================================
// SERVERS
// =============================================================================

/// Echo server on an OS-assigned port.
///
/// Sends one message on `closed` each time a client connection ends.
pub struct EchoServer {
    pub port: u16,
    pub closed: mpsc::UnboundedReceiver<()>,
}

pub async fn echo_server() -> EchoServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, closed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = tx.send(());
            });
        }
    });

    EchoServer { port, closed }
}

/// A port nothing is listening on
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A currently free port. Bind-then-release, so a tiny race is possible.
pub async fn free_port() -> u16 {
    dead_port().await
}

// =============================================================================
// CONFIGS
// =============================================================================

pub fn fast_relay() -> RelaySettings {
    RelaySettings {
        poll_interval: Duration::from_millis(50),
        drain_timeout: Duration::from_millis(500),
        ..RelaySettings::default()
    }
}

pub fn listen_config(local_port: u16, remote_port: u16) -> TunnelConfig {
    let mut config = TunnelConfig::listen(local_port, "127.0.0.1", remote_port);
    config.timeout = Duration::from_secs(2);
    config.relay = fast_relay();
    config
}

pub fn forward_config(remote_port: u16) -> TunnelConfig {
    let ssh = SshTarget::new(
        "ssh.example.com",
        22,
        "deploy",
        Credential::Password("hunter2".to_string()),
    );
    let mut config = TunnelConfig::remote_forward(ssh, 8080, "127.0.0.1", remote_port);
    config.timeout = Duration::from_secs(2);
    config.relay = fast_relay();
    config
}

// =============================================================================
// IN-MEMORY TRANSPORT
// =============================================================================

/// Behaviour knobs and call log shared by [`MemoryConnector`] and its transports
#[derive(Default)]
pub struct MemoryServer {
    pub refuse_connect: bool,
    pub refuse_forward: bool,
    pub fail_cancel: bool,
    /// Port reported back for the forward; `None` echoes the requested one
    pub assigned_port: Option<u16>,
    calls: Mutex<Vec<String>>,
    sender: Mutex<Option<ForwardSender>>,
}

impl MemoryServer {
    pub fn refusing_connect() -> Self {
        Self {
            refuse_connect: true,
            ..Self::default()
        }
    }

    pub fn refusing_forward() -> Self {
        Self {
            refuse_forward: true,
            ..Self::default()
        }
    }

    pub fn failing_cancel() -> Self {
        Self {
            fail_cancel: true,
            ..Self::default()
        }
    }

    /// Server that binds a different port than the one requested
    pub fn assigning_port(port: u16) -> Self {
        Self {
            assigned_port: Some(port),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Open a forwarded connection; returns the remote client's end.
    pub async fn open_channel(&self, originator: &str) -> DuplexStream {
        let sender = self
            .sender
            .lock()
            .unwrap()
            .clone()
            .expect("no forward registered");
        let (local, remote) = tokio::io::duplex(64 * 1024);
        sender
            .send(ForwardedChannel {
                stream: Box::new(local),
                originator: originator.to_string(),
            })
            .await
            .expect("forward listener gone");
        remote
    }

    /// Simulate the SSH connection dropping
    pub fn drop_transport(&self) {
        self.sender.lock().unwrap().take();
    }
}

pub struct MemoryConnector {
    pub server: Arc<MemoryServer>,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer) -> (Arc<Self>, Arc<MemoryServer>) {
        let server = Arc::new(server);
        (
            Arc::new(Self {
                server: Arc::clone(&server),
            }),
            server,
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        _timeout: Duration,
    ) -> portway_ssh::Result<Box<dyn Transport>> {
        self.server.record(format!("connect {}", target.authority()));
        if self.server.refuse_connect {
            return Err(SshError::AuthRejected(target.user.clone()));
        }
        Ok(Box::new(MemoryTransport {
            server: Arc::clone(&self.server),
        }))
    }
}

struct MemoryTransport {
    server: Arc<MemoryServer>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn request_forward(
        &mut self,
        bind_address: &str,
        port: u16,
    ) -> portway_ssh::Result<(u16, Box<dyn ForwardListener>)> {
        self.server.record(format!("forward {}:{}", bind_address, port));
        if self.server.refuse_forward {
            return Err(SshError::Forward("tcpip-forward request denied".to_string()));
        }
        let (tx, listener) = forward_queue(64);
        *self.server.sender.lock().unwrap() = Some(tx);
        Ok((self.server.assigned_port.unwrap_or(port), Box::new(listener)))
    }

    async fn cancel_forward(&mut self, bind_address: &str, port: u16) -> portway_ssh::Result<()> {
        self.server.record(format!("cancel {}:{}", bind_address, port));
        self.server.sender.lock().unwrap().take();
        if self.server.fail_cancel {
            return Err(SshError::Forward("cancel-tcpip-forward denied".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> portway_ssh::Result<()> {
        self.server.record("close");
        Ok(())
    }
}
