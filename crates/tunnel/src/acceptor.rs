//! Accept loop: one relay task per inbound connection

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

use portway_core::TunnelConfig;
use portway_relay::{ByteRelay, RelayEndpoint, RunningFlag};

use crate::context::SessionContext;
use crate::inbound::{AcceptError, Accepted, InboundSource};

/// Pause after a failed accept before polling again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Polls an [`InboundSource`] while the session runs.
///
/// Each accepted connection gets its own task, which connects to the
/// destination and runs a [`ByteRelay`]. A failing or panicking relay is
/// logged and reaped; it never stops the loop.
pub struct ConnectionAcceptor {
    source: InboundSource,
    config: Arc<TunnelConfig>,
    running: RunningFlag,
    ctx: Arc<SessionContext>,
    relays: JoinSet<()>,
}

impl ConnectionAcceptor {
    pub fn new(
        source: InboundSource,
        config: Arc<TunnelConfig>,
        running: RunningFlag,
        ctx: Arc<SessionContext>,
    ) -> Self {
        Self {
            source,
            config,
            running,
            ctx,
            relays: JoinSet::new(),
        }
    }

    /// Accept until the running flag drops or the source closes, then drain.
    ///
    /// The inbound source is released as soon as the loop ends. Live relays
    /// get `drain_timeout` to finish and are aborted after that.
    pub async fn run(self) {
        let Self {
            mut source,
            config,
            mut running,
            ctx,
            mut relays,
        } = self;
        let poll_interval = config.relay.poll_interval;

        loop {
            reap(&mut relays);
            if !running.is_running() {
                break;
            }

            let polled = tokio::select! {
                polled = source.accept(poll_interval) => polled,
                _ = running.stopped() => break,
            };

            match polled {
                Ok(None) => continue,
                Ok(Some(conn)) => {
                    if !running.is_running() {
                        debug!("Dropping connection from {} accepted during shutdown", conn.peer);
                        break;
                    }
                    spawn_relay(&mut relays, conn, &config, &running, &ctx);
                }
                Err(AcceptError::Closed(reason)) => {
                    if running.is_running() {
                        warn!("Inbound {} closed: {}", source.kind(), reason);
                    }
                    break;
                }
                Err(AcceptError::Transient(e)) => {
                    if running.is_running() {
                        error!("Error accepting connection: {}", e);
                    }
                    tokio::time::sleep(ACCEPT_BACKOFF.min(poll_interval)).await;
                }
            }
        }

        debug!("Releasing inbound {}", source.kind());
        drop(source);

        drain(relays, config.relay.drain_timeout).await;
        debug!("Acceptor finished");
    }
}

fn spawn_relay(
    relays: &mut JoinSet<()>,
    conn: Accepted,
    config: &Arc<TunnelConfig>,
    running: &RunningFlag,
    ctx: &Arc<SessionContext>,
) {
    let conn_id = ctx.next_connection_id();
    let span = ctx.connection_span(conn_id, &conn.peer);
    let guard = ctx.track();
    let config = Arc::clone(config);
    let running = running.clone();

    relays.spawn(
        async move {
            let _active = guard;
            relay_connection(conn, &config, running).await;
        }
        .instrument(span),
    );
}

async fn relay_connection(conn: Accepted, config: &TunnelConfig, running: RunningFlag) {
    let Accepted { stream, peer } = conn;
    info!("Accepted connection from {}", peer);

    let destination = match connect_destination(config).await {
        Ok(destination) => destination,
        Err(e) => {
            warn!("Failed to connect to {}: {}", config.destination(), e);
            let outcome = RelayEndpoint::new(stream).close().await;
            debug!("Inbound endpoint {}", outcome);
            return;
        }
    };
    debug!("Connected to {}", config.destination());

    let stats = ByteRelay::new(stream, destination, config.relay, config.timeout, running)
        .run()
        .await;

    if stats.reason.is_error() {
        warn!(
            sent = stats.inbound_to_destination,
            received = stats.destination_to_inbound,
            "Relay for {} ended: {}",
            peer,
            stats.reason
        );
    } else {
        info!(
            sent = stats.inbound_to_destination,
            received = stats.destination_to_inbound,
            "Connection from {} closed: {}",
            peer,
            stats.reason
        );
    }
}

async fn connect_destination(config: &TunnelConfig) -> io::Result<TcpStream> {
    let addr = (config.remote_host.as_str(), config.remote_port);
    let stream = match tokio::time::timeout(config.timeout, TcpStream::connect(addr)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", config.timeout),
            ))
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Collect finished relay tasks without waiting
fn reap(relays: &mut JoinSet<()>) {
    while let Some(result) = relays.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("Relay task panicked: {}", e),
        Err(e) if e.is_cancelled() => debug!("Relay task cancelled"),
        Err(e) => error!("Relay task failed: {}", e),
    }
}

async fn drain(mut relays: JoinSet<()>, deadline: Duration) {
    if relays.is_empty() {
        return;
    }
    info!(
        "Waiting up to {:?} for {} active connection(s)",
        deadline,
        relays.len()
    );

    let drained = tokio::time::timeout(deadline, async {
        while let Some(result) = relays.join_next().await {
            log_join(result);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Aborting {} connection(s) still open after {:?}",
            relays.len(),
            deadline
        );
        relays.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portway_core::RelaySettings;
    use portway_relay::RunningSignal;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        port
    }

    fn fast_config(remote_port: u16) -> Arc<TunnelConfig> {
        let mut config = TunnelConfig::listen(1, "127.0.0.1", remote_port);
        config.timeout = Duration::from_secs(2);
        config.relay = RelaySettings {
            poll_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(500),
            ..RelaySettings::default()
        };
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_acceptor_relays_and_stops() {
        let echo_port = echo_server().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let signal = RunningSignal::new();
        signal.raise();
        let ctx = Arc::new(SessionContext::new());
        let acceptor = ConnectionAcceptor::new(
            InboundSource::Listener(listener),
            fast_config(echo_port),
            signal.subscribe(),
            Arc::clone(&ctx),
        );
        let handle = tokio::spawn(acceptor.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(ctx.active_connections(), 1);

        signal.lower();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("acceptor exits")
            .unwrap();
        assert_eq!(ctx.active_connections(), 0);
        assert_eq!(ctx.total_accepted(), 1);

        // Listener released
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_destination_closes_inbound() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let signal = RunningSignal::new();
        signal.raise();
        let ctx = Arc::new(SessionContext::new());
        let handle = tokio::spawn(
            ConnectionAcceptor::new(
                InboundSource::Listener(listener),
                fast_config(dead_port),
                signal.subscribe(),
                Arc::clone(&ctx),
            )
            .run(),
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
            .await
            .expect("inbound closed promptly")
            .unwrap_or(0);
        assert_eq!(n, 0);

        // Loop keeps accepting after a failed destination
        let _second = TcpStream::connect(addr).await.unwrap();

        signal.lower();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("acceptor exits")
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_running_accepts_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let signal = RunningSignal::new();
        let ctx = Arc::new(SessionContext::new());

        tokio::time::timeout(
            Duration::from_secs(1),
            ConnectionAcceptor::new(
                InboundSource::Listener(listener),
                fast_config(9),
                signal.subscribe(),
                Arc::clone(&ctx),
            )
            .run(),
        )
        .await
        .expect("returns immediately");
        assert_eq!(ctx.total_accepted(), 0);
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_tasks() {
        let mut relays = JoinSet::new();
        relays.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let started = std::time::Instant::now();
        drain(relays, Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reap_survives_panics() {
        let mut relays = JoinSet::new();
        relays.spawn(async { panic!("relay blew up") });
        tokio::time::sleep(Duration::from_millis(50)).await;
        reap(&mut relays);
        assert!(relays.is_empty());
    }
}
