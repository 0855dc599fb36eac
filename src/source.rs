//! EVM source chain reader
//!
//! [`EvmSource`] implements [`SourceChain`] over a single JSON-RPC endpoint.
//! [`connect`] wraps one per configured URL in a [`FallbackSource`].

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RelayError, RelayResult};
use crate::rpc_fallback::{create_providers, redact_url, FallbackSource};
use crate::types::{LogPosition, RawLog};
use crate::watcher::SourceChain;

/// Read-only client for one EVM RPC endpoint
pub struct EvmSource {
    chain_id: u64,
    provider: RootProvider<Http<Client>>,
}

impl EvmSource {
    pub fn new(chain_id: u64, provider: RootProvider<Http<Client>>) -> Self {
        Self { chain_id, provider }
    }
}

/// Build a fallback source with one [`EvmSource`] per URL, in priority order
pub fn connect(chain_id: u64, rpc_urls: &[String]) -> Result<FallbackSource> {
    let endpoints = create_providers(rpc_urls)?
        .into_iter()
        .zip(rpc_urls)
        .map(|(provider, url)| {
            let source: Arc<dyn SourceChain> = Arc::new(EvmSource::new(chain_id, provider));
            (redact_url(url), source)
        })
        .collect();
    FallbackSource::new(chain_id, endpoints)
}

/// `eth_getLogs` filter for `address` with positional topics (topic0..topic3)
fn build_filter(
    from_block: u64,
    to_block: u64,
    address: Address,
    topics: &[B256],
) -> RelayResult<Filter> {
    let mut filter = Filter::new()
        .address(address)
        .from_block(from_block)
        .to_block(to_block);
    for (position, topic) in topics.iter().enumerate() {
        filter = match position {
            0 => filter.event_signature(*topic),
            1 => filter.topic1(*topic),
            2 => filter.topic2(*topic),
            3 => filter.topic3(*topic),
            _ => {
                return Err(RelayError::Config(format!(
                    "log filter supports at most 4 topics, got {}",
                    topics.len()
                )))
            }
        };
    }
    Ok(filter)
}

/// Convert an RPC log into the relay's raw log record
fn to_raw_log(log: &Log) -> RelayResult<RawLog> {
    let block_number = log
        .block_number
        .ok_or_else(|| RelayError::Transport("log is missing block number (pending?)".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| RelayError::Transport("log is missing log index (pending?)".into()))?;

    Ok(RawLog {
        address: log.inner.address,
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        position: LogPosition::new(block_number, log_index),
        tx_hash: log.transaction_hash,
    })
}

#[async_trait]
impl SourceChain for EvmSource {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn current_head(&self) -> RelayResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| RelayError::Transport(format!("eth_blockNumber failed: {}", e)))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: &[B256],
    ) -> RelayResult<Vec<RawLog>> {
        let filter = build_filter(from_block, to_block, address, topics)?;
        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            RelayError::Transport(format!(
                "eth_getLogs {}..={} failed: {}",
                from_block, to_block, e
            ))
        })?;

        debug!(
            chain_id = self.chain_id,
            from_block,
            to_block,
            count = logs.len(),
            "Fetched source logs"
        );
        logs.iter().map(to_raw_log).collect()
    }
}
