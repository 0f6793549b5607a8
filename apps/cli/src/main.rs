//! Portway CLI
//!
//! Expose a local TCP service through an SSH remote forward, or through a
//! plain local listener.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use portway_settings::{Mode, Settings};
use portway_tunnel::{public_ip, TunnelSession};

/// Portway - TCP tunnels over SSH remote forwarding
#[derive(Parser)]
#[command(name = "portway")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/portway/settings.json)
    #[arg(short, long, env = "PORTWAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask an SSH server to forward one of its ports to a local service
    Forward(ForwardArgs),

    /// Listen on a local port and relay to the destination
    Listen(ListenArgs),
}

/// Flags shared by both modes. Ports are wide so range errors surface from validation.
#[derive(Args, Debug, Default)]
struct TunnelArgs {
    /// Port to expose (on the SSH server for `forward`, locally for `listen`)
    #[arg(short = 'l', long)]
    local_port: Option<u32>,

    /// Destination host
    #[arg(long)]
    remote_host: Option<String>,

    /// Destination port
    #[arg(short = 'r', long)]
    remote_port: Option<u32>,

    /// Connect and write timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds to let live connections finish on shutdown
    #[arg(long)]
    drain_timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,
}

#[derive(Args, Debug)]
struct ForwardArgs {
    /// SSH server host
    #[arg(long)]
    ssh_host: Option<String>,

    /// SSH server port
    #[arg(long)]
    ssh_port: Option<u32>,

    /// SSH user name
    #[arg(short, long)]
    user: Option<String>,

    /// Private key file (password auth is used otherwise)
    #[arg(short = 'i', long)]
    key_file: Option<PathBuf>,

    /// Address the SSH server binds the forwarded port to
    #[arg(long)]
    bind_address: Option<String>,

    /// Skip the public IP lookup after connecting
    #[arg(long)]
    no_announce: bool,

    #[command(flatten)]
    tunnel: TunnelArgs,
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Local address to bind
    #[arg(short, long)]
    bind_host: Option<String>,

    #[command(flatten)]
    tunnel: TunnelArgs,
}

impl TunnelArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(port) = self.local_port {
            settings.local_port = port;
        }
        if let Some(host) = self.remote_host {
            settings.remote_host = host;
        }
        if let Some(port) = self.remote_port {
            settings.remote_port = port;
        }
        if let Some(secs) = self.timeout {
            settings.timeout = secs;
        }
        if let Some(secs) = self.idle_timeout {
            settings.idle_timeout_secs = secs;
        }
        if let Some(secs) = self.drain_timeout {
            settings.drain_timeout_secs = secs;
        }
        if let Some(size) = self.buffer_size {
            settings.buffer_size = size;
        }
    }
}

impl Commands {
    /// Layer command-line flags over file and environment settings
    fn apply(self, settings: &mut Settings) {
        match self {
            Commands::Forward(args) => {
                settings.mode = Mode::Forward;
                if let Some(host) = args.ssh_host {
                    settings.ssh_host = Some(host);
                }
                if let Some(port) = args.ssh_port {
                    settings.ssh_port = port;
                }
                if let Some(user) = args.user {
                    settings.ssh_user = Some(user);
                }
                if let Some(path) = args.key_file {
                    settings.ssh_key_file = Some(path);
                }
                if let Some(addr) = args.bind_address {
                    settings.forward_bind_address = addr;
                }
                if args.no_announce {
                    settings.announce_public_ip = false;
                }
                args.tunnel.apply(settings);
            }
            Commands::Listen(args) => {
                settings.mode = Mode::Listen;
                if let Some(host) = args.bind_host {
                    settings.bind_host = host;
                }
                args.tunnel.apply(settings);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    portway_logging::init(cli.verbose);

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    cli.command.apply(&mut settings);

    if settings.needs_password() {
        let password = prompt_password(&settings).await?;
        settings.ssh_password = Some(password);
    }

    run(settings).await
}

async fn prompt_password(settings: &Settings) -> Result<String> {
    let prompt = format!(
        "Password for {}@{}",
        settings.ssh_user.as_deref().unwrap_or("?"),
        settings.ssh_host.as_deref().unwrap_or("?")
    );
    let password = tokio::task::spawn_blocking(move || {
        dialoguer::Password::new().with_prompt(prompt).interact()
    })
    .await
    .context("Password prompt failed")?
    .context("Password prompt failed")?;
    Ok(password)
}

async fn run(settings: Settings) -> Result<()> {
    let config = settings
        .tunnel_config()
        .context("Invalid configuration")?;
    let forward = config.is_remote_forward();
    let destination = config.destination();

    let mut session = TunnelSession::with_ssh();
    session
        .start(config)
        .await
        .context("Failed to start tunnel")?;

    let port = session
        .local_port()
        .context("Tunnel started without a bound port")?;
    if forward && settings.announce_public_ip {
        public_ip::announce(&settings.public_ip_url, port).await;
    }

    info!(
        "Forwarding port {} to {}. Press Ctrl+C to stop.",
        port, destination
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
        }
        _ = session.closed() => {
            warn!("Tunnel closed unexpectedly, shutting down");
        }
    }

    let report = session.stop().await;
    if report.is_clean() {
        println!("Tunnel stopped ({})", report);
    } else {
        warn!("Tunnel stopped with errors");
        for failure in report.failures() {
            println!("  {}: {}", failure.step, failure.outcome);
        }
    }

    Ok(())
}
