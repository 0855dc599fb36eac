//! Common types shared by the watcher, decoder, executor and relay loop

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;
use std::fmt;

/// Position of a log record in the source chain's append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Raw log record as returned by a source chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub position: LogPosition,
    pub tx_hash: Option<B256>,
}

/// Decoded cross-chain transfer request.
///
/// Immutable once built by the decoder. `(source_chain, nonce)` is the
/// idempotency key for the destination release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeIntent {
    pub source_chain: u64,
    pub dest_chain: u64,
    pub from: Address,
    pub to: Address,
    pub src_token: Address,
    /// Destination asset after token mapping
    pub dst_token: Address,
    pub src_amount: U256,
    pub dst_amount: U256,
    pub nonce: U256,
    pub position: LogPosition,
    pub tx_hash: Option<B256>,
}

impl BridgeIntent {
    pub fn block_number(&self) -> u64 {
        self.position.block_number
    }

    /// Arguments for the destination `release` call
    pub fn release_call(&self) -> ReleaseCall {
        ReleaseCall {
            token: self.dst_token,
            to: self.to,
            amount: self.dst_amount,
            nonce: self.nonce,
        }
    }
}

/// Arguments of the destination release method: `release(token, to, amount, nonce)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseCall {
    pub token: Address,
    pub to: Address,
    pub amount: U256,
    pub nonce: U256,
}

/// Handle to a submitted (accepted, not necessarily mined) destination transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub tx_hash: B256,
    pub call: ReleaseCall,
}

/// Terminal result of a mined destination transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Success { block_number: Option<u64> },
    Reverted { reason: String },
}

/// Relay loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    Idle,
    Processing,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Idle => "idle",
            RoundState::Processing => "processing",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_position_ordering() {
        let mut positions = vec![
            LogPosition::new(11, 0),
            LogPosition::new(10, 1),
            LogPosition::new(10, 0),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                LogPosition::new(10, 0),
                LogPosition::new(10, 1),
                LogPosition::new(11, 0)
            ]
        );
    }

    #[test]
    fn test_release_call_uses_destination_fields() {
        let intent = BridgeIntent {
            source_chain: 1,
            dest_chain: 137,
            from: Address::repeat_byte(0x0a),
            to: Address::repeat_byte(0x0b),
            src_token: Address::repeat_byte(0x01),
            dst_token: Address::repeat_byte(0x02),
            src_amount: U256::from(100),
            dst_amount: U256::from(95),
            nonce: U256::from(7),
            position: LogPosition::new(1000, 0),
            tx_hash: None,
        };
        let call = intent.release_call();
        assert_eq!(call.token, Address::repeat_byte(0x02));
        assert_eq!(call.to, Address::repeat_byte(0x0b));
        assert_eq!(call.amount, U256::from(95));
        assert_eq!(call.nonce, U256::from(7));
        assert_eq!(intent.block_number(), 1000);
    }

    #[test]
    fn test_round_state_display() {
        assert_eq!(format!("{}", RoundState::Idle), "idle");
        assert_eq!(format!("{}", RoundState::Processing), "processing");
    }
}
