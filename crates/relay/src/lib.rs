//! Portway Relay
//!
//! Byte pump for one connection pair. A [`ByteRelay`] owns both endpoints,
//! multiplexes both directions in a single task with a bounded readiness
//! poll, and closes both endpoints exactly once when it ends.

mod endpoint;
mod relay;
mod signal;

pub use endpoint::{BoxedStream, DuplexStream, RelayEndpoint};
pub use relay::{ByteRelay, EndReason, RelayStats, Side};
pub use signal::{RunningFlag, RunningSignal};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Read from {side} failed: {source}")]
    Read {
        side: Side,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to {side} failed: {source}")]
    Write {
        side: Side,
        #[source]
        source: std::io::Error,
    },

    #[error("Write to {side} timed out after {after:?}")]
    WriteTimeout { side: Side, after: Duration },
}

pub type Result<T> = std::result::Result<T, RelayError>;
