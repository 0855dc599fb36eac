//! Checkpoint store: durable record of the last fully processed source block
//!
//! The relay loop is the only writer. Writes go through
//! [`CheckpointStore::compare_and_set`] so a second writer is detected
//! instead of silently overwriting progress.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{RelayError, RelayResult};

pub mod postgres;

pub use postgres::PgCheckpointStore;

/// Durable checkpoint contract
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored checkpoint for `key`, if any
    async fn load(&self, key: &str) -> RelayResult<Option<u64>>;

    /// Return the stored checkpoint for `key`, storing `default` first if
    /// nothing has been recorded yet.
    async fn load_or_default(&self, key: &str, default: u64) -> RelayResult<u64>;

    /// Replace the checkpoint with `new` only if it currently equals
    /// `expected`. Returns `false` on mismatch.
    async fn compare_and_set(&self, key: &str, expected: u64, new: u64) -> RelayResult<bool>;
}

/// Process-lifetime checkpoint store.
///
/// Restarting replays from the configured start block, which is safe because
/// destination releases are idempotent per nonce.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without inserting a default
    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.lock().ok()?.get(key).copied()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &str) -> RelayResult<Option<u64>> {
        let values = self
            .values
            .lock()
            .map_err(|_| RelayError::Checkpoint("checkpoint lock poisoned".to_string()))?;
        Ok(values.get(key).copied())
    }

    async fn load_or_default(&self, key: &str, default: u64) -> RelayResult<u64> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| RelayError::Checkpoint("checkpoint lock poisoned".to_string()))?;
        Ok(*values.entry(key.to_string()).or_insert(default))
    }

    async fn compare_and_set(&self, key: &str, expected: u64, new: u64) -> RelayResult<bool> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| RelayError::Checkpoint("checkpoint lock poisoned".to_string()))?;
        match values.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RelayError::Checkpoint(format!(
                "checkpoint {} was never initialised",
                key
            ))),
        }
    }
}

/// Checkpoint key for one source chain / contract pair
pub fn relay_key(source_chain: u64, source_contract: &alloy::primitives::Address) -> String {
    format!("{}:0x{:x}", source_chain, source_contract)
}
