//! Tunnel session lifecycle

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use portway_core::{InboundMode, Result, SessionState, TunnelConfig, TunnelError, DEFAULT_TIMEOUT};
use portway_relay::RunningSignal;
use portway_ssh::{Connector, SshConnector, Transport};

use crate::acceptor::ConnectionAcceptor;
use crate::context::SessionContext;
use crate::inbound::InboundSource;
use crate::shutdown::{self, ShutdownReport, ShutdownStep};

/// Slack on top of poll interval and drain timeout before the acceptor is aborted
const ACCEPTOR_GRACE: Duration = Duration::from_secs(2);

/// Remote forward to withdraw on stop
#[derive(Debug, Clone)]
struct ForwardRegistration {
    bind_address: String,
    port: u16,
}

/// A tunnel that can be started, stopped, and started again.
///
/// ```text
/// Idle --start--> Connecting --ok--> Running --stop--> Stopping --> Stopped
///                     |                                               |
///                     +--error--> Idle                 start <--------+
/// ```
pub struct TunnelSession {
    connector: Arc<dyn Connector>,
    state: SessionState,
    running: Arc<RunningSignal>,
    ctx: Arc<SessionContext>,
    config: Option<Arc<TunnelConfig>>,
    transport: Option<Box<dyn Transport>>,
    forward: Option<ForwardRegistration>,
    acceptor: Option<JoinHandle<()>>,
    bound_port: Option<u16>,
}

impl TunnelSession {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: SessionState::Idle,
            running: Arc::new(RunningSignal::new()),
            ctx: Arc::new(SessionContext::new()),
            config: None,
            transport: None,
            forward: None,
            acceptor: None,
            bound_port: None,
        }
    }

    /// Session using the `russh` connector for remote forwards
    pub fn with_ssh() -> Self {
        Self::new(Arc::new(SshConnector::new()))
    }

    /// Current lifecycle state.
    ///
    /// A running session whose acceptor exited on its own (the SSH transport
    /// dropped) reports `Stopping` until `stop()` finishes the teardown.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Running && !self.running.is_running() {
            SessionState::Stopping
        } else {
            self.state
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Resolves once the session stops accepting, whether through `stop()`
    /// or because the inbound source was lost. Immediate when not running.
    pub async fn closed(&self) {
        self.running.subscribe().stopped().await;
    }

    /// Port the inbound source is bound to, while running.
    ///
    /// For remote forwards this is the port the SSH server reported.
    pub fn local_port(&self) -> Option<u16> {
        self.bound_port
    }

    pub fn active_connections(&self) -> usize {
        self.ctx.active_connections()
    }

    pub fn config(&self) -> Option<&TunnelConfig> {
        self.config.as_deref()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Open the inbound source and begin accepting.
    ///
    /// On any failure nothing is left open and the state returns to `Idle`.
    pub async fn start(&mut self, config: TunnelConfig) -> Result<()> {
        config.validate()?;
        if self.state.is_active() {
            return Err(TunnelError::AlreadyRunning);
        }

        let config = Arc::new(config);
        self.state = SessionState::Connecting;

        let span = self.ctx.span().clone();
        let source = match self.open_inbound(&config).instrument(span.clone()).await {
            Ok(source) => source,
            Err(e) => {
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        // Raise before spawning so the acceptor never sees a stale false
        self.running.raise();
        let acceptor = ConnectionAcceptor::new(
            source,
            Arc::clone(&config),
            self.running.subscribe(),
            Arc::clone(&self.ctx),
        );
        let running = Arc::clone(&self.running);
        self.acceptor = Some(tokio::spawn(
            async move {
                acceptor.run().await;
                if running.lower() {
                    warn!("Tunnel no longer accepting connections");
                }
            }
            .instrument(span.clone()),
        ));

        span.in_scope(|| {
            info!(
                "Tunnel running: port {} -> {}",
                self.bound_port.unwrap_or(config.local_port),
                config.destination()
            );
        });
        self.config = Some(config);
        self.state = SessionState::Running;
        Ok(())
    }

    async fn open_inbound(&mut self, config: &TunnelConfig) -> Result<InboundSource> {
        match &config.inbound {
            InboundMode::Listen { bind_host } => {
                let addr = format!("{}:{}", bind_host, config.local_port);
                let listener = TcpListener::bind((bind_host.as_str(), config.local_port))
                    .await
                    .map_err(|source| TunnelError::Bind {
                        addr: addr.clone(),
                        source,
                    })?;
                self.bound_port = listener.local_addr().ok().map(|a| a.port());
                info!("Listening on {}", addr);
                Ok(InboundSource::Listener(listener))
            }
            InboundMode::RemoteForward { ssh, bind_address } => {
                let mut transport = self
                    .connector
                    .connect(ssh, config.timeout)
                    .await
                    .map_err(|e| TunnelError::Connect {
                        target: ssh.authority(),
                        reason: e.to_string(),
                    })?;

                let registered = match tokio::time::timeout(
                    config.timeout,
                    transport.request_forward(bind_address, config.local_port),
                )
                .await
                {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", config.timeout)),
                };

                match registered {
                    Ok((port, listener)) => {
                        self.transport = Some(transport);
                        self.forward = Some(ForwardRegistration {
                            bind_address: bind_address.clone(),
                            port,
                        });
                        self.bound_port = Some(port);
                        Ok(InboundSource::Forward(listener))
                    }
                    Err(reason) => {
                        if let Err(e) = transport.close().await {
                            warn!("Failed to close SSH transport: {}", e);
                        }
                        Err(TunnelError::Forward {
                            port: config.local_port,
                            reason,
                        })
                    }
                }
            }
        }
    }

    /// Tear the session down: stop accepting, withdraw the forward, drain
    /// relays, disconnect. Each step runs even if an earlier one failed.
    ///
    /// Calling this on an idle or stopped session does nothing.
    pub async fn stop(&mut self) -> ShutdownReport {
        if matches!(self.state, SessionState::Idle | SessionState::Stopped) {
            debug!("Stop requested on {} session", self.state);
            return ShutdownReport::default();
        }

        let span = self.ctx.span().clone();
        self.shutdown().instrument(span).await
    }

    async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        info!("Shutting down tunnel...");
        self.state = SessionState::Stopping;
        self.running.lower();

        let timeout = self.config.as_ref().map_or(DEFAULT_TIMEOUT, |c| c.timeout);

        if let (Some(transport), Some(forward)) = (self.transport.as_mut(), self.forward.take()) {
            let outcome = shutdown::bounded(
                timeout,
                transport.cancel_forward(&forward.bind_address, forward.port),
            )
            .await;
            report.record(ShutdownStep::CancelForward, outcome);
        }

        if let Some(handle) = self.acceptor.take() {
            let grace = self
                .config
                .as_ref()
                .map_or(ACCEPTOR_GRACE, |c| {
                    c.relay.poll_interval + c.relay.drain_timeout + ACCEPTOR_GRACE
                });
            report.record(
                ShutdownStep::StopAcceptor,
                shutdown::join_acceptor(handle, grace).await,
            );
        }

        if let Some(mut transport) = self.transport.take() {
            let outcome = shutdown::bounded(timeout, transport.close()).await;
            report.record(ShutdownStep::CloseTransport, outcome);
        }

        self.forward = None;
        self.bound_port = None;
        self.state = SessionState::Stopped;
        info!("Tunnel stopped");
        report
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.running.lower();
        if let Some(handle) = self.acceptor.take() {
            handle.abort();
        }
    }
}
