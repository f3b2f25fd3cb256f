//! TCP Server
//!
//! Binds the listener, loads the dictionary, starts the background jobs and
//! runs the accept loop until a shutdown future resolves.
//!
//! ## Shutdown Order
//!
//! 1. Stop accepting connections
//! 2. Stop the persistence and statistics jobs and wait for them
//! 3. Dump the dictionary one last time, on the blocking pool
//! 4. Drop the server's strong reference to the storage engine
//!
//! A request already executing may still hold the engine at step 4. The
//! engine dumps again when that last reference goes away, so its write is not
//! lost. Connections still running afterwards find their weak storage handle
//! dead and stop on their next request.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::protocol::FrameDecoder;
use crate::storage::{
    start_persistence_job, start_stats_job, DumpOutcome, StorageEngine, StorageError,
    DEFAULT_DUMP_INTERVAL, DEFAULT_STATS_INTERVAL,
};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Dictionary file read at start-up and rewritten by every dump.
pub const DEFAULT_DICTIONARY_PATH: &str = "config.txt";

/// The host the server binds to by default (all IPv4 interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Dictionary file
    pub dictionary_path: PathBuf,
    /// Interval between dumps
    pub dump_interval: Duration,
    /// Interval between statistics reports
    pub stats_interval: Duration,
    /// Largest accepted frame body; `None` accepts any length
    pub max_frame_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            dictionary_path: PathBuf::from(DEFAULT_DICTIONARY_PATH),
            dump_interval: DEFAULT_DUMP_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
            max_frame_size: None,
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The dictionary could not be loaded
    #[error("failed to load dictionary: {0}")]
    Storage(#[from] StorageError),

    /// The listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound server, ready to run.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Loads the dictionary and binds the listener.
    ///
    /// The dictionary is loaded first, so a bad file aborts start-up before
    /// any port is opened.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let storage = StorageEngine::load(&config.dictionary_path)?;
        Self::with_storage(config, storage).await
    }

    /// Binds the listener around an already constructed engine.
    ///
    /// The engine is switched to dump on drop.
    pub async fn with_storage(
        config: ServerConfig,
        storage: StorageEngine,
    ) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        Ok(Self {
            config,
            listener,
            storage: Arc::new(storage.persist_on_drop(true)),
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Serves connections until `shutdown` resolves, then shuts down in order.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            listener,
            storage,
            stats,
        } = self;

        let persistence = start_persistence_job(Arc::clone(&storage), config.dump_interval);
        let reporter = start_stats_job(
            Arc::clone(&storage),
            Arc::clone(&stats),
            config.stats_interval,
        );

        info!(addr = %listener.local_addr()?, "Listening");

        let decoder = match config.max_frame_size {
            Some(max) => FrameDecoder::with_max_frame_size(max),
            None => FrameDecoder::new(),
        };
        let handler = CommandHandler::new(&storage);

        tokio::select! {
            _ = accept_loop(listener, handler, decoder, stats) => {}
            _ = shutdown => {
                info!("Shutdown signal received, stopping server...");
            }
        }

        persistence.shutdown().await;
        reporter.shutdown().await;

        // Dropping the last reference dumps again.
        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = storage.dump();
            drop(storage);
            outcome
        })
        .await;

        match outcome {
            Ok(Ok(DumpOutcome::Done)) => info!("Final dump written"),
            Ok(Ok(DumpOutcome::Skipped)) => info!("Dictionary already up to date"),
            Ok(Err(e)) => error!(error = %e, "Final dump failed"),
            Err(e) => error!(error = %e, "Final dump task failed"),
        }

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    decoder: FrameDecoder,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, decoder, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::protocol::{Command, Reply};
    use crate::storage::Stat;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn test_config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            dictionary_path: dir.path().join("config.txt"),
            dump_interval: Duration::from_millis(20),
            stats_interval: Duration::from_millis(20),
            max_frame_size: None,
        }
    }

    #[tokio::test]
    async fn test_bind_fails_on_missing_dictionary() {
        let dir = TempDir::new().unwrap();
        let result = Server::bind(test_config(&dir)).await;
        assert!(matches!(
            result,
            Err(ServerError::Storage(StorageError::MissingFile(_)))
        ));
    }

    #[tokio::test]
    async fn test_scenario_end_to_end() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(&config.dictionary_path, r#"{"a":"1"}"#).unwrap();

        let server = Server::bind(config.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let storage = Arc::downgrade(server.storage());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut client = Client::connect(addr).await.unwrap();

        match client.set("b", "2").await.unwrap() {
            Reply::Response(r) => assert_eq!(r.stat, Stat::new(0, 1)),
            Reply::Error => panic!("set failed"),
        }
        match client.get("a").await.unwrap() {
            Reply::Response(r) => {
                assert_eq!(r.found, Some(true));
                assert_eq!(r.value.as_deref(), Some("1"));
                assert_eq!(r.stat, Stat::new(1, 0));
            }
            Reply::Error => panic!("get failed"),
        }
        match client.get("c").await.unwrap() {
            Reply::Response(r) => assert_eq!(r.found, Some(false)),
            Reply::Error => panic!("get failed"),
        }
        assert!(client.send(&Command::Unknown).await.unwrap().is_error());

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        // Storage is torn down and its state is on disk.
        assert!(storage.upgrade().is_none());
        let on_disk: HashMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&config.dictionary_path).unwrap()).unwrap();
        assert_eq!(on_disk.get("a").map(String::as_str), Some("1"));
        assert_eq!(on_disk.get("b").map(String::as_str), Some("2"));

        // The open connection stops instead of answering.
        assert!(client.get("a").await.is_err());
    }

    #[tokio::test]
    async fn test_set_after_final_dump_reaches_disk() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(&config.dictionary_path, r#"{"a":"1"}"#).unwrap();

        let server = Server::bind(config.clone()).await.unwrap();
        let storage = Arc::downgrade(server.storage());

        // Stands in for a request that is mid-execution during shutdown.
        let inflight = storage.upgrade().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));
        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        inflight.set("late", "write");
        drop(inflight);

        assert!(storage.upgrade().is_none());
        let reloaded = StorageEngine::load(&config.dictionary_path).unwrap();
        assert_eq!(reloaded.get("late").0.as_deref(), Some("write"));
        assert_eq!(reloaded.get("a").0.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_large_value_accepted_by_default() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(&config.dictionary_path, "{}").unwrap();

        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let value = "x".repeat(17 * 1024 * 1024);
        let mut client = Client::connect(addr).await.unwrap();
        assert!(!client.set("big", value.clone()).await.unwrap().is_error());
        match client.get("big").await.unwrap() {
            Reply::Response(r) => assert_eq!(r.value.map(|v| v.len()), Some(value.len())),
            Reply::Error => panic!("get failed"),
        }

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
