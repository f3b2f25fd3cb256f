//! Storage Engine Module
//!
//! This module provides the shared dictionary, its statistics, and the
//! background jobs that persist it and report on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌──────────────────┐ ┌──────────────┐ ┌────────────────┐   │
//! │  │ dictionary       │ │ KeyStats     │ │ lifetime/period│   │
//! │  │ RwLock<HashMap>  │ │ RwLock+atomic│ │ atomics        │   │
//! │  └──────────────────┘ └──────────────┘ └────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!               ▲                               ▲
//!               │ dump()                        │ take_stats()
//!   ┌───────────┴───────────┐       ┌───────────┴───────────┐
//!   │   persistence job     │       │   statistics job      │
//!   │ (Background Tokio Task)│       │ (Background Tokio Task)│
//!   └───────────────────────┘       └───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use dictkv::storage::StorageEngine;
//!
//! let engine = StorageEngine::new("dictionary.json");
//! engine.set("name", "Ariz");
//! let (value, stat) = engine.get("name");
//! assert_eq!(value.as_deref(), Some("Ariz"));
//! assert_eq!((stat.get_count, stat.set_count), (1, 1));
//! ```

pub mod engine;
pub mod jobs;
pub mod stats;

// Re-export commonly used types
pub use engine::{tmp_path, DumpOutcome, StatsReport, StorageEngine, StorageError};
pub use jobs::{
    start_persistence_job, start_stats_job, JobHandle, DEFAULT_DUMP_INTERVAL,
    DEFAULT_STATS_INTERVAL,
};
pub use stats::{AtomicStat, KeyStats, Op, Stat};
