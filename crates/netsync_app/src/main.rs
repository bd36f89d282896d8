//! # netsync_app
//!
//! Runs a replication server and a handful of clients in one process over a
//! loopback hub, ticking them at a fixed rate and logging what each client
//! sees.
//!
//! ## Startup Sequence
//!
//! 1. Load the replication config (JSON file or defaults).
//! 2. Start the server, spawn the chest scene object and three crates.
//! 3. Connect the clients; each asks for a player once connected.
//! 4. Enter the fixed-timestep tick loop.

mod simulation;
mod tick;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use netsync_replication::ReplicationConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use simulation::Simulation;
use tick::{TickConfig, TickLoop};

#[derive(Parser)]
#[command(name = "netsync_app", about = "In-process replication demo")]
struct Args {
    /// Number of ticks to run (0 = until interrupted)
    #[arg(short, long, default_value_t = 300)]
    ticks: u64,

    /// Number of clients to connect
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    /// JSON replication config; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("netsync=info".parse()?))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ReplicationConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ReplicationConfig::default(),
    };
    info!(
        tick_rate = config.tick_rate,
        clients = args.clients,
        address = %config.listen_address,
        "netsync demo starting"
    );

    let tick_config = TickConfig {
        tick_rate: config.tick_rate,
        max_ticks: args.ticks,
    };
    let mut simulation = Simulation::new(config, args.clients)?;
    let mut tick_loop = TickLoop::new(tick_config);

    let interrupted = tokio::select! {
        () = tick_loop.run(&mut simulation) => false,
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            true
        }
    };
    if interrupted {
        info!(ticks = tick_loop.tick_id(), "interrupted");
    }

    simulation.report();
    simulation.shutdown(Instant::now());
    info!("netsync demo shut down");
    Ok(())
}
