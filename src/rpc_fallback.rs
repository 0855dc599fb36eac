//! RPC endpoint fallback
//!
//! Endpoints are tried in configured order. Logs are only accepted from an
//! endpoint whose own head covers the requested range, so a lagging node
//! answering `[]` for blocks it has not seen yet cannot open a gap.

use alloy::primitives::{Address, B256};
use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing::warn;

use crate::error::{RelayError, RelayResult};
use crate::types::RawLog;
use crate::watcher::SourceChain;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create alloy HTTP providers for each RPC URL, in fallback order.
pub fn create_providers(urls: &[String]) -> Result<Vec<RootProvider<Http<Client>>>> {
    if urls.is_empty() {
        return Err(eyre::eyre!("At least one RPC URL is required"));
    }
    urls.iter()
        .map(|url| {
            let parsed = url
                .parse()
                .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
            Ok(ProviderBuilder::new().on_http(parsed))
        })
        .collect()
}

/// Source chain backed by several endpoints, primary first
pub struct FallbackSource {
    chain_id: u64,
    endpoints: Vec<(String, Arc<dyn SourceChain>)>,
}

impl FallbackSource {
    /// `endpoints` are `(label, source)` pairs; labels appear in logs only
    pub fn new(chain_id: u64, endpoints: Vec<(String, Arc<dyn SourceChain>)>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(eyre::eyre!("At least one RPC endpoint is required"));
        }
        Ok(Self { chain_id, endpoints })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[async_trait]
impl SourceChain for FallbackSource {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn current_head(&self) -> RelayResult<u64> {
        let mut last_error = String::new();
        for (label, endpoint) in &self.endpoints {
            match endpoint.current_head().await {
                Ok(head) => return Ok(head),
                Err(e) => {
                    warn!(chain_id = self.chain_id, rpc = %label, error = %e, "eth_blockNumber failed, trying next RPC");
                    last_error = e.to_string();
                }
            }
        }
        Err(RelayError::Transport(format!(
            "all RPC endpoints failed for eth_blockNumber: {}",
            last_error
        )))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: &[B256],
    ) -> RelayResult<Vec<RawLog>> {
        let mut last_error = String::new();
        for (label, endpoint) in &self.endpoints {
            match endpoint.current_head().await {
                Ok(head) if head >= to_block => {}
                Ok(head) => {
                    warn!(
                        chain_id = self.chain_id,
                        rpc = %label,
                        head,
                        to_block,
                        "RPC head behind requested range, trying next RPC"
                    );
                    last_error = format!("{} at head {} is behind block {}", label, head, to_block);
                    continue;
                }
                Err(e) => {
                    warn!(chain_id = self.chain_id, rpc = %label, error = %e, "eth_blockNumber failed, trying next RPC");
                    last_error = e.to_string();
                    continue;
                }
            }

            match endpoint.get_logs(from_block, to_block, address, topics).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!(
                        chain_id = self.chain_id,
                        rpc = %label,
                        from_block,
                        to_block,
                        error = %e,
                        "eth_getLogs failed, trying next RPC"
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(RelayError::Transport(format!(
            "all RPC endpoints failed for eth_getLogs {}..={}: {}",
            from_block, to_block, last_error
        )))
    }
}

/// Strip credentials and query strings before a URL is logged
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
