//! xdl - packager, tunnel and local server orchestration
//!
//! This is the binary entry point. All logic lives in the library and the
//! workspace crates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use xdl_app::{config_dir, load_config, LocalEnvironment, Orchestrator};
use xdl_core::prelude::*;
use xdl_core::PackagerConfig;
use xdl_daemon::NgrokAgent;

/// Serve a mobile app project to devices on the LAN or through a tunnel
#[derive(Parser, Debug)]
#[command(name = "xdl")]
#[command(about = "Packager, tunnel and manifest server for mobile app development", long_about = None)]
struct Args {
    /// Path to the project (defaults to the current directory)
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Port of the local manifest server
    #[arg(long)]
    port: Option<u16>,

    /// Port the packager listens on
    #[arg(long)]
    packager_port: Option<u16>,

    /// Entry-point module, relative to the project
    #[arg(long)]
    entry_point: Option<String>,

    /// Start the packager with a clean cache
    #[arg(long)]
    reset_cache: bool,

    /// Do not open a public tunnel
    #[arg(long)]
    no_tunnel: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install().map_err(|e| Error::config(e.to_string()))?;

    // stdout carries the NDJSON stream, logs go to a file
    xdl_core::logging::init()?;

    let base_path = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let project_root = match dunce::canonicalize(&base_path) {
        Ok(path) => path,
        Err(_) => {
            eprintln!("❌ No project found at: {}", base_path.display());
            std::process::exit(1);
        }
    };

    let xdl_config = load_config(&config_dir());

    let mut config = PackagerConfig::new(&project_root);
    config.port = args.port;
    config.packager_port = args.packager_port;
    config.entry_point = args.entry_point;

    let env = Arc::new(LocalEnvironment::new(&xdl_config));
    let agent = NgrokAgent::new(&xdl_config.tunnel.agent_api)?;

    let mut orchestrator = Orchestrator::new(config, env, agent)
        .with_tunnel_config(xdl_config.tunnel.tunnel_config())
        .with_port_range_start(xdl_config.ports.range_start)
        .with_reset_cache(args.reset_cache);
    if args.no_tunnel {
        orchestrator = orchestrator.without_tunnel();
    }

    let result = xdl::run_headless(orchestrator).await;
    if let Err(ref e) = result {
        error!("Application error: {:?}", e);
    }
    result
}
