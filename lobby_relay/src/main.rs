// CLI entry point for the lobby relay.
//
// Loads configuration (defaults, then `--config` file, then environment,
// then flags), loads the user/lobby registry, and runs the relay until
// SIGINT or SIGTERM. See `server.rs` for the threading model and `config.rs`
// for every setting and its environment variable.
//
// Usage:
//   relay [OPTIONS]
//     --config <PATH>   JSON config file
//     --port <PORT>     Listen port (default: 8080, env UDP_PORT)
//     --bind <ADDR>     Listen address (default: 0.0.0.0, env RELAY_BIND_ADDRESS)
//
// Logging goes through `tracing`; set `RUST_LOG` (e.g. `lobby_relay=debug`)
// to see dropped handshakes.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use lobby_relay::{Collaborators, JwtAuthority, Registry, RelayConfig, start_relay};
use tracing_subscriber::EnvFilter;

/// UDP rendezvous-and-relay server for owner/peer lobbies
#[derive(Parser)]
#[command(name = "relay", version)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match RelayConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => fatal(format_args!("{e}")),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Err(e) = config.validate() {
        fatal(format_args!("{e}"));
    }

    let registry = match &config.registry_path {
        Some(path) => match Registry::load(path) {
            Ok(registry) => registry,
            Err(e) => fatal(format_args!("{e}")),
        },
        None => {
            tracing::warn!("no registry configured; every handshake will be rejected");
            Registry::new()
        }
    };
    tracing::info!(users = registry.user_count(), "registry loaded");

    let authority = match JwtAuthority::new(&config.jwt_secret) {
        Ok(authority) => authority,
        Err(e) => fatal(format_args!("unusable JWT secret: {e}")),
    };

    let registry = Arc::new(registry);
    let collaborators = Collaborators {
        credentials: registry.clone(),
        tokens: Arc::new(authority),
        lobbies: registry,
    };

    let (handle, _addr) = match start_relay(config, collaborators) {
        Ok(result) => result,
        Err(e) => fatal(format_args!("failed to start relay: {e}")),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            fatal(format_args!("cannot install signal handler: {e}"));
        }
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutting down");
    handle.stop();
}

fn fatal(message: std::fmt::Arguments<'_>) -> ! {
    tracing::error!("{message}");
    std::process::exit(1);
}
