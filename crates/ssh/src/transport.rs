//! Transport seams
//!
//! The session talks to SSH only through these traits so the acceptor and
//! shutdown logic can run against in-memory transports in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use portway_core::SshTarget;
use portway_relay::BoxedStream;

use crate::{Result, SshError};

/// One connection delivered through a remote forward
pub struct ForwardedChannel {
    pub stream: BoxedStream,
    /// `address:port` of the client that connected on the SSH host
    pub originator: String,
}

impl fmt::Debug for ForwardedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedChannel")
            .field("originator", &self.originator)
            .finish_non_exhaustive()
    }
}

/// Opens authenticated transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate; the whole exchange is bounded by `timeout`.
    async fn connect(&self, target: &SshTarget, timeout: Duration) -> Result<Box<dyn Transport>>;
}

/// An authenticated session
#[async_trait]
pub trait Transport: Send {
    /// Ask the server to listen on `bind_address:port` and forward connections back.
    ///
    /// Returns the port the server actually bound and the listener that
    /// yields forwarded channels. Only one forward may be registered per
    /// transport.
    async fn request_forward(
        &mut self,
        bind_address: &str,
        port: u16,
    ) -> Result<(u16, Box<dyn ForwardListener>)>;

    async fn cancel_forward(&mut self, bind_address: &str, port: u16) -> Result<()>;

    /// Disconnect. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Accept side of a remote forward
#[async_trait]
pub trait ForwardListener: Send {
    /// Wait up to `wait` for the next forwarded channel.
    ///
    /// `Ok(None)` means nothing arrived in time. An error means the transport
    /// is gone and no more channels will come.
    async fn accept(&mut self, wait: Duration) -> Result<Option<ForwardedChannel>>;
}

/// Producer half of a forwarded-channel queue
pub type ForwardSender = mpsc::Sender<ForwardedChannel>;

/// Queue-backed [`ForwardListener`]
#[derive(Debug)]
pub struct ChannelForwardListener {
    rx: mpsc::Receiver<ForwardedChannel>,
}

/// Create a bounded forwarded-channel queue.
pub fn forward_queue(capacity: usize) -> (ForwardSender, ChannelForwardListener) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelForwardListener { rx })
}

#[async_trait]
impl ForwardListener for ChannelForwardListener {
    async fn accept(&mut self, wait: Duration) -> Result<Option<ForwardedChannel>> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(channel)) => Ok(Some(channel)),
            Ok(None) => Err(SshError::TransportClosed),
            Err(_) => Ok(None),
        }
    }
}
