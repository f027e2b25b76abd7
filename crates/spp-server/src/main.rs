//! SPP-Link server entry point.
//!
//! Listens for one client at a time, prints every received chunk to stdout,
//! and forwards each stdin line to the connected peer.  An empty line sends
//! the configured default payload.  After a client drops, the server relists
//! on its own and waits for the next one; if the accept loop dies, a watchdog
//! tick restarts it.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- server.toml or --config
//!  └─ ServerController::new()   -- session + TCP factory
//!  └─ start()                   -- spawns the acceptor thread
//!  └─ select! loop
//!       ├─ LinkEvent            -> log / stdout
//!       ├─ stdin line           -> send_data
//!       ├─ watchdog tick        -> ensure_accepting()
//!       └─ Ctrl-C               -> stop()
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spp_core::transport::tcp::TcpTransportFactory;
use spp_core::{ConnectionState, LinkEvent, SecurityFlag};
use spp_server::application::controller::ServerController;
use spp_server::infrastructure::storage::config::{load_config, save_config};

/// How often the accept loop is checked for an unexpected exit.
const ACCEPT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "spp-server", version, about = "Listen for an SPP-Link client and relay bytes")]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, env = "SPP_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, `ip:port`.  Overrides the config file.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Use the insecure channel variant and remember the choice.
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("loading server config")?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("SPP-Link server starting");

    let security = SecurityFlag::new(config.link.secure);
    if cli.insecure && security.set(false) {
        config.link.secure = false;
        if let Err(e) = save_config(&config, cli.config.as_deref()) {
            warn!("could not persist security preference: {e}");
        }
    }

    let bind_addr = match cli.bind {
        Some(addr) => addr,
        None => config.link.bind_addr()?,
    };
    let factory = Arc::new(TcpTransportFactory::new(
        config.link.service_record(),
        bind_addr,
    ));
    let (controller, mut events) = ServerController::new(factory, Arc::new(security));
    let controller = Arc::new(controller);

    if controller.state() == ConnectionState::None {
        controller.start()?;
    }
    info!("SPP-Link server listening on {bind_addr}.  Press Ctrl-C to exit.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let default_payload = config.server.default_payload.clone();
    let mut watchdog = tokio::time::interval(ACCEPT_WATCHDOG_INTERVAL);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::StateChanged(state)) => {
                    info!("state: {state} ({})", state.status_label());
                }
                Some(LinkEvent::PeerConnected(name)) => info!("client connected: {name}"),
                Some(LinkEvent::DataReceived(bytes)) => {
                    println!("{}", String::from_utf8_lossy(&bytes));
                }
                Some(LinkEvent::Toast(text)) => warn!("{text}"),
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
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
                    info!("stdin closed; still serving until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("reading stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = watchdog.tick() => {
                let watched = Arc::clone(&controller);
                tokio::task::spawn_blocking(move || watched.ensure_accepting()).await??;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let stopping = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    info!("SPP-Link server stopped");
    Ok(())
}
