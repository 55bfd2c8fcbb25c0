//! chatline server
//!
//! Accepts chat clients over TCP and gives the operator a console on stdin
//! for broadcasting, unicasting and listing sessions.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (8888)
//! chatlined
//!
//! # Custom port and ack timeout
//! chatlined --port 9000 --ack-timeout 10
//!
//! # Explicit config file
//! chatlined --config ./server.toml
//!
//! # Enable debug logging
//! RUST_LOG=chatlined=debug chatlined
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: stop accepting connections and exit

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatline_core::ServerConfig;
use chatlined::console::{run_console, HELP_TEXT};
use chatlined::dispatcher::Dispatcher;
use chatlined::events::{SharedEventSink, TracingSink};
use chatlined::registry::spawn_registry;
use chatlined::server::ChatServer;

/// Grace period for in-flight tasks at exit
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// chatline server - line-based TCP chat with an operator console
#[derive(Parser, Debug)]
#[command(name = "chatlined", version, about)]
struct Args {
    /// Config file (default: <config dir>/chatline/server.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CHATLINE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Seconds to wait for a disconnect acknowledgement (0 waits forever)
    #[arg(long, value_name = "SECS")]
    ack_timeout: Option<u64>,
}

impl Args {
    fn load_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ServerConfig::load_default().context("Failed to load default config")?,
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(secs) = self.ack_timeout {
            config.disconnect_ack_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The stdin reader sits on a blocking thread, so don't wait for it on exit
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(run_server(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE_PERIOD);
    result
}

async fn run_server(args: Args) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("chatlined=info".parse()?)
                .add_directive("chatline_core=info".parse()?)
                .add_directive("chatline_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "chatline server starting"
    );

    let config = args.load_config()?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let events: SharedEventSink = Arc::new(TracingSink);
    let registry = spawn_registry(Arc::clone(&events));
    info!("Session registry started");

    let server = ChatServer::bind(&config, registry.clone(), Arc::clone(&events), cancel_token.clone())
        .await
        .context("Failed to start server")?;

    println!("Listening on {}. {HELP_TEXT}", server.local_addr());

    let console = tokio::spawn(run_console(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        Dispatcher::new(registry, events),
        server.registry().clone(),
        cancel_token.clone(),
    ));

    server.run().await;

    if console.is_finished() {
        if let Ok(Err(e)) = console.await {
            error!(error = %e, "Console error");
        }
    } else {
        console.abort();
    }

    info!("chatline server stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
