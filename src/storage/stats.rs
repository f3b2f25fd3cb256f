//! Operation Counters
//!
//! Two flavours of statistics are tracked for every `get` and `set`:
//!
//! - **Global**: one lifetime counter pair that only ever grows, and one
//!   current-period pair that the statistics job reads and resets.
//! - **Per-key**: a counter pair for every key ever touched. Entries are
//!   created lazily and never removed, not even when the key is overwritten.
//!
//! ## Locking
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ KeyStats: RwLock<HashMap<String, AtomicStat>>│
//! │                                              │
//! │  hit  ─> read lock  ─> fetch_add (lock-free) │
//! │  miss ─> write lock ─> insert + fetch_add    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The map lock only guards structural changes. Counter updates on an
//! existing entry never need exclusive access, so concurrent traffic on known
//! keys proceeds under shared read locks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// A `{get_count, set_count}` pair.
///
/// This is both the API type returned by the storage engine and the `stat`
/// object sent back to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub get_count: u64,
    pub set_count: u64,
}

impl Stat {
    pub fn new(get_count: u64, set_count: u64) -> Self {
        Self {
            get_count,
            set_count,
        }
    }
}

/// Which counter an operation bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Set,
}

/// Lock-free counter pair.
#[derive(Debug, Default)]
pub struct AtomicStat {
    get_count: AtomicU64,
    set_count: AtomicU64,
}

impl AtomicStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the counter for `op`.
    #[inline]
    pub fn record(&self, op: Op) {
        match op {
            Op::Get => self.get_count.fetch_add(1, Ordering::Relaxed),
            Op::Set => self.set_count.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Bumps the counter for `op` and returns the pair including that bump.
    #[inline]
    pub fn record_and_load(&self, op: Op) -> Stat {
        self.record(op);
        self.load()
    }

    /// Reads both counters.
    pub fn load(&self) -> Stat {
        Stat {
            get_count: self.get_count.load(Ordering::Relaxed),
            set_count: self.set_count.load(Ordering::Relaxed),
        }
    }

    /// Reads both counters and resets them to zero.
    ///
    /// Each counter is swapped individually, so an increment racing with the
    /// reset lands either in this period or the next one, never in both.
    pub fn take(&self) -> Stat {
        Stat {
            get_count: self.get_count.swap(0, Ordering::Relaxed),
            set_count: self.set_count.swap(0, Ordering::Relaxed),
        }
    }
}

/// Per-key counters.
#[derive(Debug, Default)]
pub struct KeyStats {
    entries: RwLock<HashMap<String, AtomicStat>>,
}

impl KeyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `op` against `key` and returns the key's counters after the bump.
    pub fn record(&self, key: &str, op: Op) -> Stat {
        // Fast path: the key has been seen before.
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(stat) = entries.get(key) {
                return stat.record_and_load(op);
            }
        }

        // First sighting. Another caller may have inserted it since the read
        // lock was dropped.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(key.to_owned())
            .or_default()
            .record_and_load(op)
    }

    /// Returns the counters for `key` without touching them.
    pub fn get(&self, key: &str) -> Option<Stat> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(AtomicStat::load)
    }

    /// Number of distinct keys ever recorded.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_stat_take_resets() {
        let stat = AtomicStat::new();
        stat.record(Op::Get);
        stat.record(Op::Get);
        stat.record(Op::Set);

        assert_eq!(stat.take(), Stat::new(2, 1));
        assert_eq!(stat.load(), Stat::default());
    }

    #[test]
    fn test_record_includes_current_op() {
        let stats = KeyStats::new();
        assert_eq!(stats.record("a", Op::Set), Stat::new(0, 1));
        assert_eq!(stats.record("a", Op::Get), Stat::new(1, 1));
        assert_eq!(stats.record("a", Op::Get), Stat::new(2, 1));
    }

    #[test]
    fn test_keys_are_isolated() {
        let stats = KeyStats::new();
        stats.record("k1", Op::Set);
        stats.record("k1", Op::Set);
        stats.record("k2", Op::Get);

        assert_eq!(stats.get("k1"), Some(Stat::new(0, 2)));
        assert_eq!(stats.get("k2"), Some(Stat::new(1, 0)));
        assert_eq!(stats.get("k3"), None);
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn test_concurrent_first_sighting() {
        let stats = Arc::new(KeyStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    stats.record(&format!("key-{}", i % 10), Op::Set);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.len(), 10);
        for i in 0..10 {
            assert_eq!(stats.get(&format!("key-{}", i)), Some(Stat::new(0, 80)));
        }
    }
}
