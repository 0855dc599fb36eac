//! Event decoding and token mapping
//!
//! Turns a raw `BridgeRequested` log into a [`BridgeIntent`]. Decoding is a
//! pure function; any layout mismatch is a non-retryable `DecodeError`.

use alloy::primitives::B256;
use alloy::sol_types::SolEvent;
use std::sync::Arc;

use crate::contracts::Bridge::BridgeRequested;
use crate::error::{RelayError, RelayResult};
use crate::token_map::TokenMap;
use crate::types::{BridgeIntent, RawLog};

/// Topic0 of `BridgeRequested(address,address,address,address,uint256,uint256,uint256,uint256)`
pub fn bridge_requested_topic() -> B256 {
    BridgeRequested::SIGNATURE_HASH
}

/// Decodes source logs for one relay route
#[derive(Debug, Clone)]
pub struct EventDecoder {
    source_chain: u64,
    dest_chain: u64,
    token_map: Arc<TokenMap>,
}

impl EventDecoder {
    pub fn new(source_chain: u64, dest_chain: u64, token_map: Arc<TokenMap>) -> Self {
        Self {
            source_chain,
            dest_chain,
            token_map,
        }
    }

    /// Decode one log record and apply the token map to `dstToken`
    pub fn decode(&self, log: &RawLog) -> RelayResult<BridgeIntent> {
        match log.topics.first() {
            Some(topic) if *topic == bridge_requested_topic() => {}
            Some(topic) => {
                return Err(RelayError::Decode(format!(
                    "unexpected event topic {} at {}",
                    topic, log.position
                )))
            }
            None => {
                return Err(RelayError::Decode(format!(
                    "log at {} has no topics",
                    log.position
                )))
            }
        }

        let event = BridgeRequested::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| {
                RelayError::Decode(format!(
                    "malformed BridgeRequested at {}: {}",
                    log.position, e
                ))
            })?;

        Ok(BridgeIntent {
            source_chain: self.source_chain,
            dest_chain: self.dest_chain,
            from: event.from,
            to: event.to,
            src_token: event.srcToken,
            dst_token: self.token_map.map(event.dstToken),
            src_amount: event.srcAmount,
            dst_amount: event.dstAmount,
            nonce: event.nonce,
            position: log.position,
            tx_hash: log.tx_hash,
        })
    }
}
