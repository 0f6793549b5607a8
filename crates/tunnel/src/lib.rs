//! Portway Tunnel
//!
//! Session lifecycle and connection acceptance.
//!
//! ## Components
//!
//! - **TunnelSession**: validates config, opens the inbound source, runs the
//!   acceptor, and tears everything down on `stop()`
//! - **ConnectionAcceptor**: polls the inbound source and spawns one relay per
//!   accepted connection
//! - **InboundSource**: local TCP listener or SSH remote forward
//! - **SessionContext**: session id, tracing span and connection counters
//!
//! ## Example
//!
//! ```no_run
//! use portway_core::TunnelConfig;
//! use portway_tunnel::TunnelSession;
//!
//! # async fn run() -> portway_core::Result<()> {
//! let mut session = TunnelSession::with_ssh();
//! session.start(TunnelConfig::listen(18080, "127.0.0.1", 9000)).await?;
//! // ...
//! let report = session.stop().await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

mod acceptor;
mod context;
mod inbound;
pub mod public_ip;
mod session;
mod shutdown;

pub use acceptor::ConnectionAcceptor;
pub use context::{ActiveConnection, SessionContext};
pub use inbound::{AcceptError, Accepted, InboundSource};
pub use session::TunnelSession;
pub use shutdown::{ShutdownReport, ShutdownStep, StepOutcome};

pub use portway_core::{Result, TunnelError};
