//! relayd: APRS digipeater and IGate
//!
//! Usage: `relayd [config.json]`
//!
//! Frames are read from stdin in monitor format, one per line, optionally
//! prefixed with a channel number. Transmitted frames are logged.

mod node;
mod settings;

use std::path::PathBuf;

use relay_igate::{igate_start, Timing};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use node::{run_dispatcher, spawn_stdin_reader, spawn_transmitters, Node};
use settings::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relayd=info,relay_core=info,relay_igate=info,relay_packet=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(path.as_deref())?;

    let node = Node::build(config);
    let txq = node.txq();
    let rxq = node.rxq();

    let _igate_tasks = igate_start(&node.igate(), Timing::default());
    let _transmitters = spawn_transmitters(node.channels(), &txq, &rxq)?;
    let _input = spawn_stdin_reader(std::sync::Arc::clone(&rxq))?;

    std::thread::Builder::new()
        .name("dispatch".into())
        .spawn(move || run_dispatcher(node))?;

    info!("relayd {} running", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
