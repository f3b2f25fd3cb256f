//! Command Dispatch
//!
//! Routes a decoded [`Command`] to the storage engine and builds the
//! [`Reply`].
//!
//! ## Weak Storage Handle
//!
//! The handler holds a `Weak<StorageEngine>`. Every command resolves it to a
//! live reference first; once the server has dropped the engine, `execute`
//! returns `None` and the connection stops. A connection therefore never
//! keeps the engine alive past shutdown.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                CommandHandler               │
//! │                                             │
//! │  upgrade() ──None──> stop connection        │
//! │      │                                      │
//! │    Some                                     │
//! │      ▼                                      │
//! │  Get/Set ──> StorageEngine ──> Response     │
//! │  Unknown ─────────────────────> ERROR       │
//! └─────────────────────────────────────────────┘
//! ```

use crate::protocol::{Command, Reply, Response};
use crate::storage::StorageEngine;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Executes commands against a storage engine it does not own.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Weak<StorageEngine>,
}

impl CommandHandler {
    /// Creates a handler referring to `storage` without keeping it alive.
    pub fn new(storage: &Arc<StorageEngine>) -> Self {
        Self {
            storage: Arc::downgrade(storage),
        }
    }

    /// Executes a command and returns the reply.
    ///
    /// # Returns
    ///
    /// `None` if the storage engine has been torn down. Unknown commands get
    /// [`Reply::Error`] only while the engine is still alive, so a connection
    /// of a stopped server never answers anything.
    pub fn execute(&self, command: Command) -> Option<Reply> {
        let storage = self.storage.upgrade()?;

        let reply = match command {
            Command::Get { key } => {
                let (value, stat) = storage.get(&key);
                trace!(key = %key, found = value.is_some(), "GET");
                Response::get(key, value, stat).into()
            }
            Command::Set { key, value } => {
                trace!(key = %key, "SET");
                Response::set(storage.set(key, value)).into()
            }
            Command::Unknown => Reply::Error,
        };

        Some(reply)
    }

    /// Whether the storage engine is still alive.
    pub fn is_live(&self) -> bool {
        self.storage.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Stat;

    fn setup() -> (Arc<StorageEngine>, CommandHandler) {
        let storage = Arc::new(StorageEngine::new("unused.json"));
        let handler = CommandHandler::new(&storage);
        (storage, handler)
    }

    #[test]
    fn test_set_then_get() {
        let (_storage, handler) = setup();

        assert_eq!(
            handler.execute(Command::set("name", "Ariz")),
            Some(Reply::Response(Response::set(Stat::new(0, 1))))
        );
        assert_eq!(
            handler.execute(Command::get("name")),
            Some(Reply::Response(Response::get(
                "name",
                Some("Ariz".to_string()),
                Stat::new(1, 1)
            )))
        );
    }

    #[test]
    fn test_get_missing() {
        let (_storage, handler) = setup();

        match handler.execute(Command::get("ghost")) {
            Some(Reply::Response(response)) => {
                assert_eq!(response.found, Some(false));
                assert_eq!(response.value, None);
                assert_eq!(response.key.as_deref(), Some("ghost"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_does_not_touch_storage() {
        let (storage, handler) = setup();

        assert_eq!(handler.execute(Command::Unknown), Some(Reply::Error));
        assert_eq!(storage.take_stats().lifetime, Stat::default());
    }

    #[test]
    fn test_dropped_storage() {
        let (storage, handler) = setup();
        assert!(handler.is_live());

        drop(storage);

        assert!(!handler.is_live());
        assert_eq!(handler.execute(Command::get("name")), None);
        assert_eq!(handler.execute(Command::Unknown), None);
    }

    #[test]
    fn test_handler_does_not_keep_storage_alive() {
        let (storage, handler) = setup();
        let _clone = handler.clone();
        assert_eq!(Arc::strong_count(&storage), 1);
    }
}
