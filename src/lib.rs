//! Bridge Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod contracts;
pub mod decoder;
pub mod deployment;
pub mod destination;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod relay;
pub mod retry;
pub mod rpc_fallback;
pub mod source;
pub mod token_map;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
