//! Write path configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings consumed by a single write.
///
/// Values default to those of a stock server; tests usually shorten the lock
/// timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteSettings {
    /// How long an upsert waits for its dedup-scope locks.
    pub lock_acquire_timeout: Duration,
    /// Upper bound on the summed byte length of string unique-key columns of
    /// one row.
    pub max_string_size_for_unique_key: usize,
    /// Maximum distinct partitions one batch may touch (`0` = unlimited).
    pub max_partitions_per_insert_block: usize,
    /// Worker threads used to persist sub-batches of one write.
    pub max_threads_for_dump: usize,
    /// Worker threads used for independent cross-part dedup groups.
    pub dedup_threads: usize,
    /// Attempts of the lock/fetch/validate loop before giving up.
    pub max_dedup_scope_retries: usize,
    /// Leave server-initiated plain inserts pending instead of committing.
    pub disable_transaction_commit: bool,
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            lock_acquire_timeout: Duration::from_secs(30),
            max_string_size_for_unique_key: 1 << 20,
            max_partitions_per_insert_block: 100,
            max_threads_for_dump: 4,
            dedup_threads: 4,
            max_dedup_scope_retries: 3,
            disable_transaction_commit: false,
        }
    }
}

impl WriteSettings {
    pub fn with_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    pub fn with_max_string_size_for_unique_key(mut self, limit: usize) -> Self {
        self.max_string_size_for_unique_key = limit;
        self
    }

    pub fn with_max_partitions_per_insert_block(mut self, limit: usize) -> Self {
        self.max_partitions_per_insert_block = limit;
        self
    }

    pub fn with_max_threads_for_dump(mut self, threads: usize) -> Self {
        self.max_threads_for_dump = threads;
        self
    }

    pub fn with_dedup_threads(mut self, threads: usize) -> Self {
        self.dedup_threads = threads;
        self
    }

    pub fn with_max_dedup_scope_retries(mut self, retries: usize) -> Self {
        self.max_dedup_scope_retries = retries;
        self
    }

    pub fn with_disable_transaction_commit(mut self, disable: bool) -> Self {
        self.disable_transaction_commit = disable;
        self
    }
}
