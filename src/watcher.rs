//! Log watcher
//!
//! Reads the source chain head and fetches `BridgeRequested` logs in bounded
//! block windows. Read-only; every failure is a retryable `TransportError`.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::types::RawLog;

/// Read interface of a source chain
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Native chain id, used for log context
    fn chain_id(&self) -> u64;

    /// Current head height
    async fn current_head(&self) -> RelayResult<u64>;

    /// Logs emitted by `address` matching `topics` in `[from_block, to_block]`
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: &[B256],
    ) -> RelayResult<Vec<RawLog>>;
}

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Maximum block range per query (to avoid RPC limits)
    pub max_block_range: u64,
    /// Blocks behind the head considered final
    pub finality_blocks: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_block_range: 2_000,
            finality_blocks: 0,
        }
    }
}

/// Polls one contract on one source chain
pub struct LogWatcher {
    source: Arc<dyn SourceChain>,
    contract: Address,
    topics: Vec<B256>,
    config: WatcherConfig,
}

impl LogWatcher {
    pub fn new(
        source: Arc<dyn SourceChain>,
        contract: Address,
        topics: Vec<B256>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            source,
            contract,
            topics,
            config,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.source.chain_id()
    }

    /// Highest block considered safe to scan (head minus finality lag)
    pub async fn safe_head(&self) -> RelayResult<u64> {
        let head = self.source.current_head().await?;
        Ok(head.saturating_sub(self.config.finality_blocks))
    }

    /// Next window to scan after `cursor`, or `None` when caught up
    pub fn next_window(&self, cursor: u64, safe_head: u64) -> Option<(u64, u64)> {
        if safe_head <= cursor {
            return None;
        }
        let from = cursor + 1;
        let span = self.config.max_block_range.max(1);
        let to = safe_head.min(from.saturating_add(span - 1));
        Some((from, to))
    }

    /// Fetch logs for `[from_block, to_block]` in ascending (block, log index) order
    pub async fn fetch(&self, from_block: u64, to_block: u64) -> RelayResult<Vec<RawLog>> {
        if from_block > to_block {
            return Err(RelayError::Transport(format!(
                "invalid range {}..={}",
                from_block, to_block
            )));
        }

        let mut logs = self
            .source
            .get_logs(from_block, to_block, self.contract, &self.topics)
            .await?;

        let before = logs.len();
        logs.retain(|log| {
            let in_range = (from_block..=to_block).contains(&log.position.block_number);
            if !in_range || log.address != self.contract {
                warn!(
                    chain_id = self.chain_id(),
                    position = %log.position,
                    address = %log.address,
                    "Discarding log outside requested range or contract"
                );
            }
            in_range && log.address == self.contract
        });
        logs.sort_by_key(|log| log.position);
        logs.dedup_by_key(|log| log.position);

        if logs.len() != before {
            debug!(
                returned = before,
                kept = logs.len(),
                "Source returned out-of-range or duplicate logs"
            );
        }

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bridge_requested_log, MockSource};
    use crate::types::LogPosition;

    fn watcher(source: Arc<MockSource>, config: WatcherConfig) -> LogWatcher {
        LogWatcher::new(
            source,
            MockSource::CONTRACT,
            vec![crate::decoder::bridge_requested_topic()],
            config,
        )
    }

    fn log_at(block: u64, index: u64) -> RawLog {
        bridge_requested_log(
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
            1,
            1,
            block * 10 + index,
            LogPosition::new(block, index),
        )
    }

    #[test]
    fn test_next_window() {
        let w = watcher(
            Arc::new(MockSource::new(1)),
            WatcherConfig {
                max_block_range: 100,
                finality_blocks: 0,
            },
        );
        assert_eq!(w.next_window(10, 10), None);
        assert_eq!(w.next_window(10, 5), None);
        assert_eq!(w.next_window(10, 11), Some((11, 11)));
        assert_eq!(w.next_window(10, 50), Some((11, 50)));
        assert_eq!(w.next_window(10, 1000), Some((11, 110)));
    }

    #[tokio::test]
    async fn test_safe_head_applies_finality() {
        let source = Arc::new(MockSource::new(1));
        source.set_head(100);
        let w = watcher(
            source.clone(),
            WatcherConfig {
                max_block_range: 100,
                finality_blocks: 12,
            },
        );
        assert_eq!(w.safe_head().await.unwrap(), 88);

        source.set_head(5);
        assert_eq!(w.safe_head().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_orders_by_block_then_index() {
        let source = Arc::new(MockSource::new(1));
        source.set_head(20);
        source.push_log(log_at(11, 0));
        source.push_log(log_at(10, 1));
        source.push_log(log_at(10, 0));
        let w = watcher(source, WatcherConfig::default());

        let logs = w.fetch(1, 20).await.unwrap();
        let positions: Vec<_> = logs.iter().map(|l| l.position).collect();
        assert_eq!(
            positions,
            vec![
                LogPosition::new(10, 0),
                LogPosition::new(10, 1),
                LogPosition::new(11, 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_is_inclusive_range() {
        let source = Arc::new(MockSource::new(1));
        source.set_head(20);
        for block in 5..=8 {
            source.push_log(log_at(block, 0));
        }
        let w = watcher(source.clone(), WatcherConfig::default());

        let logs = w.fetch(6, 7).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].position.block_number, 6);
        assert_eq!(logs[1].position.block_number, 7);
        assert_eq!(source.queried_ranges(), vec![(6, 7)]);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let source = Arc::new(MockSource::new(1));
        source.set_head(20);
        source.fail_next_get_logs(1);
        let w = watcher(source, WatcherConfig::default());

        let err = w.fetch(1, 20).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(err.is_retryable());
    }
}
