//! powder-relay binary entry point.
//!
//! Thin wrapper over the library: parse flags, load config, run the
//! accept loop until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use powder_relay::{Config, NoopHooks, RelayServer};

/// Multiplexing relay server for collaborative particle-simulation clients.
#[derive(Debug, Parser)]
#[command(name = "powder-relay", version, about)]
struct Args {
    /// Host/interface to bind (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = Arc::new(RelayServer::new(config, Arc::new(NoopHooks)));
    tokio::select! {
        result = server.listen() => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("[Relay] Shutting down");
            Ok(())
        }
    }
}
