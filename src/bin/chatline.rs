//! chatline client
//!
//! Connects to a chatline server, sends each line typed on stdin and prints
//! whatever the server sends back.
//!
//! # Usage
//!
//! ```bash
//! chatline --name alice
//! chatline --name bob --host chat.example.org --port 9000
//! ```
//!
//! Type `bye` to ask the server to end the session, or `/quit` to
//! disconnect immediately.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use chatline_client::input::{render_event, Input};
use chatline_client::{ChatClient, ClientEvent};
use chatline_core::{ClientConfig, Identity};

/// Grace period for in-flight tasks at exit
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// chatline client - line-based TCP chat
#[derive(Parser, Debug)]
#[command(name = "chatline", version, about)]
struct Args {
    /// Name to register with the server
    #[arg(short, long)]
    name: String,

    /// Server host
    #[arg(long, env = "CHATLINE_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "CHATLINE_PORT")]
    port: Option<u16>,

    /// Config file (default: <config dir>/chatline/client.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ClientConfig::load_default().context("Failed to load default config")?,
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The stdin reader sits on a blocking thread, so don't wait for it on exit
    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(run_client(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE_PERIOD);
    result
}

async fn run_client(args: Args) -> Result<()> {
    // Quiet by default so log lines don't interleave with the chat
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("chatline_client=warn".parse()?),
        )
        .init();

    let config = args.load_config()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let client = ChatClient::connect(&config, Identity::new(args.name.trim()), event_tx).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
                if event == ClientEvent::Closed {
                    break;
                }
            }

            line = stdin.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed");
                    client.disconnect().await?;
                    break;
                };

                match Input::parse(&line) {
                    Input::None => {}
                    Input::Quit => {
                        client.disconnect().await?;
                        break;
                    }
                    Input::Send(text) => {
                        println!("Me: {text}");
                        client.send(&text).await?;
                    }
                }
            }
        }
    }

    // Flush whatever the receive loop reported while disconnecting
    while let Ok(event) = event_rx.try_recv() {
        if let Some(text) = render_event(&event) {
            println!("{text}");
        }
    }

    Ok(())
}
