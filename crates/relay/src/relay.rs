//! Single-task bidirectional byte relay
//!
//! Both directions are served from one loop that waits on "A readable",
//! "B readable", the shutdown edge and a poll timer. Whichever side fires is
//! read into its own buffer and written in full to the other side under a
//! write deadline. EOF on either side ends the whole relay; half-duplex
//! continuation is not supported.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use portway_core::{CloseOutcome, RelaySettings};

use crate::endpoint::RelayEndpoint;
use crate::signal::RunningFlag;
use crate::RelayError;

/// Which endpoint of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted or forwarded connection
    Inbound,
    /// Socket opened to the configured destination
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// Why a relay stopped
#[derive(Debug)]
pub enum EndReason {
    /// Zero-length read from this side
    PeerClosed(Side),
    /// Session running flag lowered
    Shutdown,
    /// No traffic for the configured idle timeout
    IdleTimeout,
    Failed(RelayError),
}

impl EndReason {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed(side) => write!(f, "{} closed", side),
            Self::Shutdown => f.write_str("shutdown"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Summary returned when a relay finishes
#[derive(Debug)]
pub struct RelayStats {
    /// Bytes copied inbound → destination
    pub inbound_to_destination: u64,
    /// Bytes copied destination → inbound
    pub destination_to_inbound: u64,
    pub reason: EndReason,
    pub inbound_close: CloseOutcome,
    pub destination_close: CloseOutcome,
}

enum Ready {
    Inbound(std::io::Result<usize>),
    Destination(std::io::Result<usize>),
    Shutdown,
    Tick,
}

/// Relay for exactly one connection pair
pub struct ByteRelay<A, B> {
    inbound: RelayEndpoint<A>,
    destination: RelayEndpoint<B>,
    settings: RelaySettings,
    write_timeout: Duration,
    running: RunningFlag,
}

impl<A, B> ByteRelay<A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        inbound: A,
        destination: B,
        settings: RelaySettings,
        write_timeout: Duration,
        running: RunningFlag,
    ) -> Self {
        Self {
            inbound: RelayEndpoint::new(inbound),
            destination: RelayEndpoint::new(destination),
            settings,
            write_timeout,
            running,
        }
    }

    /// Pump until EOF, error, idle timeout or shutdown, then close both ends.
    pub async fn run(mut self) -> RelayStats {
        let mut inbound_buf = vec![0u8; self.settings.buffer_size];
        let mut destination_buf = vec![0u8; self.settings.buffer_size];
        let mut inbound_to_destination = 0u64;
        let mut destination_to_inbound = 0u64;
        let mut last_activity = Instant::now();

        let reason = loop {
            if !self.running.is_running() {
                break EndReason::Shutdown;
            }
            if let Some(idle) = self.settings.idle_timeout {
                if last_activity.elapsed() >= idle {
                    break EndReason::IdleTimeout;
                }
            }

            let (Some(inbound), Some(destination)) =
                (self.inbound.stream_mut(), self.destination.stream_mut())
            else {
                break EndReason::Shutdown;
            };

            let ready = tokio::select! {
                r = inbound.read(&mut inbound_buf) => Ready::Inbound(r),
                r = destination.read(&mut destination_buf) => Ready::Destination(r),
                _ = self.running.stopped() => Ready::Shutdown,
                _ = tokio::time::sleep(self.settings.poll_interval) => Ready::Tick,
            };

            match ready {
                Ready::Inbound(Ok(0)) => break EndReason::PeerClosed(Side::Inbound),
                Ready::Inbound(Ok(n)) => {
                    let data = &inbound_buf[..n];
                    if let Err(e) = write_bounded(destination, data, Side::Destination, self.write_timeout).await {
                        break EndReason::Failed(e);
                    }
                    inbound_to_destination += n as u64;
                    last_activity = Instant::now();
                }
                Ready::Inbound(Err(source)) => {
                    break EndReason::Failed(RelayError::Read {
                        side: Side::Inbound,
                        source,
                    })
                }
                Ready::Destination(Ok(0)) => break EndReason::PeerClosed(Side::Destination),
                Ready::Destination(Ok(n)) => {
                    let data = &destination_buf[..n];
                    if let Err(e) = write_bounded(inbound, data, Side::Inbound, self.write_timeout).await {
                        break EndReason::Failed(e);
                    }
                    destination_to_inbound += n as u64;
                    last_activity = Instant::now();
                }
                Ready::Destination(Err(source)) => {
                    break EndReason::Failed(RelayError::Read {
                        side: Side::Destination,
                        source,
                    })
                }
                Ready::Shutdown => break EndReason::Shutdown,
                Ready::Tick => {}
            }
        };

        let inbound_close = self.inbound.close().await;
        let destination_close = self.destination.close().await;

        if let CloseOutcome::Failed(e) = &inbound_close {
            warn!("Failed to close inbound endpoint: {}", e);
        }
        if let CloseOutcome::Failed(e) = &destination_close {
            warn!("Failed to close destination endpoint: {}", e);
        }

        debug!(
            sent = inbound_to_destination,
            received = destination_to_inbound,
            "Relay ended: {}",
            reason
        );

        RelayStats {
            inbound_to_destination,
            destination_to_inbound,
            reason,
            inbound_close,
            destination_close,
        }
    }
}

async fn write_bounded<S>(stream: &mut S, data: &[u8], side: Side, deadline: Duration) -> crate::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(data).await?;
        stream.flush().await
    };

    match tokio::time::timeout(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(RelayError::Write { side, source }),
        Err(_) => Err(RelayError::WriteTimeout { side, after: deadline }),
    }
}
