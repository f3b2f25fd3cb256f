//! # dictkv - A Networked Key-Value Dictionary
//!
//! dictkv serves a string-to-string dictionary over TCP. Clients send `get`
//! and `set` requests as length-prefixed JSON frames; the server answers from
//! memory, flushes the dictionary to disk every few seconds, and counts every
//! operation per key and in aggregate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               dictkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │ Weak                    │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   Frame     │    │              StorageEngine                   │   │
//! │  │   Codec     │    │  dictionary (RwLock) │ KeyStats │ atomics    │   │
//! │  └─────────────┘    └──────────────────────────────────────────────┘   │
//! │                                    ▲                ▲                   │
//! │                       ┌────────────┴───┐   ┌────────┴───────┐           │
//! │                       │ Persistence job│   │ Statistics job │           │
//! │                       └────────────────┘   └────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use dictkv::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(ServerConfig::with_port(4000)).await?;
//!     server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Frame codec and JSON message types
//! - [`storage`]: Dictionary, statistics, persistence and background jobs
//! - [`commands`]: Command dispatch through a weak storage handle
//! - [`connection`]: Per-connection state machine
//! - [`server`]: Listener, configuration and shutdown
//! - [`client`]: Async client used by the bundled tools
//!
//! ## Design Highlights
//!
//! ### Crash-Safe Dumps
//!
//! The dictionary is written to `<path>.tmp` and renamed over `<path>`. The
//! primary file always holds a complete snapshot; a leftover temp file stops
//! the next start-up until an operator looks at it.
//!
//! ### Statistics Off the Data Path
//!
//! Per-key counters live in their own map with atomic entries, and global
//! counters are atomics, so counting never waits on the dictionary lock.

pub mod client;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, Decoded, FrameDecoder, ProtocolError, Reply, Response};
pub use server::{Server, ServerConfig, ServerError};
pub use storage::{DumpOutcome, Stat, StorageEngine, StorageError};

/// Version of dictkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the `tracing` subscriber used by the bundled binaries.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Logs go to stderr
/// so stdout stays free for command output.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}
