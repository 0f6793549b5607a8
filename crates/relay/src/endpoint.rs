//! Relay endpoints with an idempotent close

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use portway_core::CloseOutcome;

/// Upper bound on a graceful shutdown before the stream is dropped anyway
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Anything a relay can pump bytes through
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased endpoint, used where TCP sockets and SSH channels mix
pub type BoxedStream = Box<dyn DuplexStream>;

/// One side of a relay.
///
/// Owns its stream until [`close`](Self::close) takes it. Later closes are
/// no-ops that report [`CloseOutcome::AlreadyClosed`].
pub struct RelayEndpoint<S> {
    stream: Option<S>,
}

impl<S> RelayEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream: Some(stream) }
    }

    /// The live stream, or `None` once closed
    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Shut the stream down and release it.
    ///
    /// The stream is dropped whatever the shutdown result, so the descriptor
    /// never outlives this call.
    pub async fn close(&mut self) -> CloseOutcome {
        let Some(mut stream) = self.stream.take() else {
            return CloseOutcome::AlreadyClosed;
        };

        let outcome = match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
            Ok(result) => CloseOutcome::from_io(result),
            Err(_) => CloseOutcome::Failed(format!("shutdown timed out after {:?}", CLOSE_TIMEOUT)),
        };
        drop(stream);
        outcome
    }
}
