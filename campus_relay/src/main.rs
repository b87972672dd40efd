// CLI entry point for the campus relay.
//
// Binds the TCP and UDP sockets, then runs the operator console on
// stdin/stdout until `quit` or end of input, and shuts down cleanly.
// See `server.rs` for the threading model and `console.rs` for commands.
//
// Usage:
//   campus-relay [OPTIONS]
//     -c, --config <FILE>         JSON config file
//     --bind <ADDR>               Bind address (default: 0.0.0.0)
//     --tcp-port <PORT>           TCP port (default: 54000)
//     --udp-port <PORT>           UDP port (default: 54001)
//     --poll-interval-ms <MS>     Loop poll interval (default: 1000)
//
// Log verbosity follows `RUST_LOG` (default `info`).

use std::io;

use campus_relay::console::run_admin_console;
use campus_relay::{ServerArgs, start_relay};
use clap::Parser;
use log::{error, info};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ServerArgs::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!("Loaded {} campus identities", config.campuses.len());

    let handle = match start_relay(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    if let Err(e) = run_admin_console(handle.relay(), stdin.lock(), io::stdout()) {
        error!("Console failed: {e}");
    }

    handle.stop();
    info!("Server stopped");
}
