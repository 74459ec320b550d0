//! # Queue Server Binary Entry Point
//!
//! Thin wrapper that loads configuration, sets up logging and runs the
//! election/lifecycle middleware.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin queue-server -- --config config/queue.toml
//! PORT=8080 cargo run --bin queue-server
//! ```
//!
//! The server will:
//! 1. Scan the local network for LAN addresses
//! 2. Probe the LAN for an already running queue server
//! 3. Stand down if one answers, otherwise serve and announce itself

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::Arc;

use number_queue::common::config::{load_config, AppConfig};
use number_queue::server::{ConsoleOperator, RunOutcome, ServerMiddleware};

/// Command-line arguments for the queue server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML format)
    ///
    /// Example: config/queue.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Service port, overrides the configuration file
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Address the service binds to
    #[arg(long)]
    bind: Option<String>,

    /// Directory with the display and admin pages
    #[arg(long)]
    static_dir: Option<String>,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// INFO by default, `RUST_LOG` overrides it.
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config: AppConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(static_dir) = args.static_dir {
        config.server.static_dir = static_dir;
    }

    let operator = ConsoleOperator::new(config.server.port);
    let middleware = Arc::new(ServerMiddleware::new(config, operator));

    let signals = middleware.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received, shutting down");
            signals.shutdown();
        }
        // A second Ctrl-C leaves immediately
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    match middleware.run().await? {
        RunOutcome::Yielded(reason) => {
            info!("Exiting: {}", reason);
            // An interrupted acknowledgement leaves a blocking stdin read that
            // would hold the runtime open
            std::process::exit(0);
        }
        RunOutcome::Stopped => info!("Exiting"),
    }

    Ok(())
}
