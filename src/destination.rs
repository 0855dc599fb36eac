//! EVM destination chain writer
//!
//! Signs and submits `release` transactions. Uses alloy's
//! `ProviderBuilder::with_recommended_fillers()` so nonce, gas limit and fee
//! fields are populated automatically.

use alloy::eips::BlockId;
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::contracts::Bridge;
use crate::error::{RelayError, RelayResult};
use crate::executor::DestinationChain;
use crate::retry::extract_revert_reason;
use crate::rpc_fallback::redact_url;
use crate::types::{Confirmation, ReleaseCall, TxHandle};

/// Receipt poll interval while awaiting confirmation
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Signing EVM client for the destination bridge
pub struct EvmDestination {
    chain_id: u64,
    rpc_url: String,
    bridge_address: Address,
    signer: PrivateKeySigner,
    confirmation_timeout: Duration,
}

impl EvmDestination {
    pub fn new(
        chain_id: u64,
        rpc_url: &str,
        bridge_address: Address,
        private_key: &str,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
        // Fail on a malformed URL at startup rather than on first submission
        let _: url::Url = rpc_url.parse().wrap_err("Invalid destination RPC URL")?;

        info!(
            relayer_address = %signer.address(),
            bridge = %bridge_address,
            chain_id,
            rpc = %redact_url(rpc_url),
            "EVM destination initialized"
        );

        Ok(Self {
            chain_id,
            rpc_url: rpc_url.to_string(),
            bridge_address,
            signer,
            confirmation_timeout,
        })
    }

    /// Address transactions are signed with
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn rpc_url(&self) -> RelayResult<url::Url> {
        self.rpc_url
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid destination RPC URL: {}", e)))
    }

    /// Re-run a reverted call at its block to recover the revert reason.
    ///
    /// Fails with `Submission` when the replay itself cannot reach the node,
    /// so an unknown outcome is retried instead of treated as a revert.
    async fn replay_revert_reason(
        &self,
        call: &ReleaseCall,
        block_number: Option<u64>,
    ) -> RelayResult<String> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = Bridge::new(self.bridge_address, &provider);

        let mut request = contract
            .release(call.token, call.to, call.amount, call.nonce)
            .from(self.signer.address());
        if let Some(block) = block_number {
            request = request.block(BlockId::number(block));
        }

        match request.call().await {
            Ok(_) => Ok("execution reverted".to_string()),
            Err(e) => replayed_revert(&e.to_string()),
        }
    }
}

/// Revert reason carried by a failed replay, or `Submission` when the error
/// is not a revert
fn replayed_revert(message: &str) -> RelayResult<String> {
    extract_revert_reason(message).ok_or_else(|| {
        RelayError::Submission(format!("failed to replay reverted release: {}", message))
    })
}

#[async_trait]
impl DestinationChain for EvmDestination {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit(&self, call: &ReleaseCall) -> RelayResult<TxHandle> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url()?);

        let contract = Bridge::new(self.bridge_address, &provider);

        debug!(
            token = %call.token,
            to = %call.to,
            amount = %call.amount,
            nonce = %call.nonce,
            "Submitting release"
        );

        let pending_tx = contract
            .release(call.token, call.to, call.amount, call.nonce)
            .send()
            .await
            .map_err(|e| match extract_revert_reason(&e.to_string()) {
                Some(reason) => RelayError::execution(reason),
                None => RelayError::Submission(format!("failed to send release tx: {}", e)),
            })?;

        let tx_hash = *pending_tx.tx_hash();
        info!(tx_hash = %tx_hash, nonce = %call.nonce, "Release transaction sent");

        Ok(TxHandle {
            tx_hash,
            call: *call,
        })
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> RelayResult<Confirmation> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            match provider.get_transaction_receipt(handle.tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status() {
                        return Ok(Confirmation::Success {
                            block_number: receipt.block_number,
                        });
                    }
                    let reason = self
                        .replay_revert_reason(&handle.call, receipt.block_number)
                        .await?;
                    return Ok(Confirmation::Reverted { reason });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tx_hash = %handle.tx_hash, error = %e, "Failed to fetch receipt, will retry");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(RelayError::Submission(format!(
                    "no receipt for {} after {:?}",
                    handle.tx_hash, self.confirmation_timeout
                )));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
