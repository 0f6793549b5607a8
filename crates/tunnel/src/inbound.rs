//! Where inbound connections come from

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::debug;

use portway_relay::BoxedStream;
use portway_ssh::{ForwardListener, SshError};

/// A connection ready to be relayed
pub struct Accepted {
    pub stream: BoxedStream,
    /// Remote address of the connecting client
    pub peer: String,
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum AcceptError {
    /// One accept failed; the source is still usable
    #[error("accept failed: {0}")]
    Transient(#[from] io::Error),

    /// The source will never yield another connection
    #[error("inbound source closed: {0}")]
    Closed(String),
}

/// Local listener or remote forward, polled the same way by the acceptor
pub enum InboundSource {
    Listener(TcpListener),
    Forward(Box<dyn ForwardListener>),
}

impl InboundSource {
    /// Wait up to `wait` for the next connection.
    ///
    /// `Ok(None)` is a poll timeout, not an error. Cancel safe.
    pub async fn accept(&mut self, wait: Duration) -> Result<Option<Accepted>, AcceptError> {
        match self {
            Self::Listener(listener) => {
                let (stream, addr) = match tokio::time::timeout(wait, listener.accept()).await {
                    Err(_) => return Ok(None),
                    Ok(accepted) => accepted?,
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                }
                Ok(Some(Accepted {
                    stream: Box::new(stream),
                    peer: addr.to_string(),
                }))
            }
            Self::Forward(listener) => match listener.accept(wait).await {
                Ok(Some(channel)) => Ok(Some(Accepted {
                    stream: channel.stream,
                    peer: channel.originator,
                })),
                Ok(None) => Ok(None),
                Err(SshError::TransportClosed) => {
                    Err(AcceptError::Closed("SSH transport closed".to_string()))
                }
                Err(e) => Err(AcceptError::Closed(e.to_string())),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Listener(_) => "listener",
            Self::Forward(_) => "remote forward",
        }
    }
}

impl fmt::Debug for InboundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener(listener) => f
                .debug_tuple("Listener")
                .field(&listener.local_addr().ok())
                .finish(),
            Self::Forward(_) => f.write_str("Forward"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portway_ssh::{forward_queue, ForwardedChannel};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_listener_poll_timeout_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut source = InboundSource::Listener(listener);
        let result = source.accept(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut source = InboundSource::Listener(listener);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut accepted = source
            .accept(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("client connected");
        assert_eq!(accepted.peer, client.local_addr().unwrap().to_string());

        client.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        accepted.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[tokio::test]
    async fn test_forward_source_yields_channels_then_closes() {
        let (tx, listener) = forward_queue(2);
        let mut source = InboundSource::Forward(Box::new(listener));
        assert_eq!(source.kind(), "remote forward");

        let (local, _peer) = tokio::io::duplex(16);
        tx.send(ForwardedChannel {
            stream: Box::new(local),
            originator: "198.51.100.4:40000".to_string(),
        })
        .await
        .unwrap();

        let accepted = source
            .accept(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("channel queued");
        assert_eq!(accepted.peer, "198.51.100.4:40000");

        drop(tx);
        let closed = source.accept(Duration::from_millis(200)).await;
        assert!(matches!(closed, Err(AcceptError::Closed(_))));
    }
}
