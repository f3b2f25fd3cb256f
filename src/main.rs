//! dictkv - Dictionary Server
//!
//! This is the main entry point for the server.
//! It loads the dictionary, binds the listener and serves until Ctrl+C.
//!
//! ```text
//! USAGE:
//!     dictkv <PORT>
//! ```
//!
//! The dictionary is read from and dumped to `config.txt` in the working
//! directory.

use dictkv::server::{Server, ServerConfig};
use tokio::signal;
use tracing::{error, info};

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("dictkv");

    if args.len() != 2 {
        eprintln!("Usage: {} <port>", program);
        std::process::exit(1);
    }

    let port = args[1].parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid port number: {}", args[1]);
        eprintln!("Usage: {} <port>", program);
        std::process::exit(1);
    });

    ServerConfig::with_port(port)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging
    dictkv::init_tracing();

    let workers = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    info!(
        version = dictkv::VERSION,
        workers,
        dictionary = %config.dictionary_path.display(),
        "Starting dictkv"
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    server.run_until(shutdown).await?;
    Ok(())
}
