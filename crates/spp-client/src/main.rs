//! SPP-Link client entry point.
//!
//! Connects to the server at the given address, prints every received chunk
//! to stdout, and forwards each stdin line to the peer.  An empty line sends
//! the configured default payload.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- client.toml or --config
//!  └─ ClientController::new()   -- session + TCP factory
//!  └─ start(), connect_to(peer) -- spawns the connector thread
//!  └─ select! loop
//!       ├─ LinkEvent            -> log / stdout
//!       ├─ stdin line           -> send_data
//!       └─ Ctrl-C               -> stop()
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spp_client::application::controller::ClientController;
use spp_client::infrastructure::storage::config::{load_config, save_config};
use spp_core::transport::tcp::TcpTransportFactory;
use spp_core::{LinkEvent, SecurityFlag, ServiceRecord};

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "spp-client", version, about = "Connect to an SPP-Link server and relay bytes")]
struct Cli {
    /// Server address, `ip:port`.
    peer: String,

    /// Display name for the server.
    #[arg(long)]
    name: Option<String>,

    /// Config file (defaults to the platform config directory).
    #[arg(long, env = "SPP_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Use the insecure channel variant and remember the choice.
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("loading client config")?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    info!("SPP-Link client starting");

    let security = SecurityFlag::new(config.link.secure);
    if cli.insecure && security.set(false) {
        config.link.secure = false;
        if let Err(e) = save_config(&config, cli.config.as_deref()) {
            warn!("could not persist security preference: {e}");
        }
    }

    let service = ServiceRecord {
        uuid: config.link.service_uuid,
        name: config.client.name.clone(),
    };
    let factory = Arc::new(TcpTransportFactory::new(service, "0.0.0.0:0".parse()?));
    let (controller, mut events) = ClientController::new(factory, Arc::new(security));
    let controller = Arc::new(controller);

    controller.start();
    {
        let controller = Arc::clone(&controller);
        let peer = cli.peer.clone();
        let name = cli.name.clone();
        tokio::task::spawn_blocking(move || controller.connect_to(&peer, name.as_deref()))
            .await??;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let default_payload = config.client.default_payload.clone();

    info!("SPP-Link client ready.  Press Ctrl-C to exit.");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::StateChanged(state)) => {
                    info!("state: {state} ({})", state.status_label());
                }
                Some(LinkEvent::PeerConnected(name)) => info!("connected to {name}"),
                Some(LinkEvent::DataReceived(bytes)) => {
                    println!("{}", String::from_utf8_lossy(&bytes));
                }
                Some(LinkEvent::Toast(text)) => warn!("{text}"),
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    let bytes = if line.is_empty() {
                        default_payload.clone().into_bytes()
                    } else {
                        line.into_bytes()
                    };
                    let controller = Arc::clone(&controller);
                    tokio::task::spawn_blocking(move || controller.send_data(&bytes)).await?;
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("reading stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let stopping = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    info!("SPP-Link client stopped");
    Ok(())
}
