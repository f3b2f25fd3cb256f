//! Command Handler Module
//!
//! This module implements the command processing layer.
//! It receives decoded commands, executes them against the storage engine,
//! and returns appropriate replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame Codec    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Upgrade      │
//! │  - Dispatch     │
//! │  - Build reply  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `get` - look up a key
//! - `set` - insert or overwrite a key

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
