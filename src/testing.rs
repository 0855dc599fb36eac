//! In-memory source and destination chains for tests
//!
//! `MockSource` serves a scripted log set and head height. `MockDestination`
//! enforces per-nonce idempotency like the real bridge contract and can be
//! told to fail, revert or block submissions.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::contracts::Bridge::BridgeRequested;
use crate::error::{RelayError, RelayResult};
use crate::executor::DestinationChain;
use crate::types::{BridgeIntent, Confirmation, LogPosition, RawLog, ReleaseCall, TxHandle};
use crate::watcher::SourceChain;

/// Build an ABI-encoded `BridgeRequested` log emitted by [`MockSource::CONTRACT`]
#[allow(clippy::too_many_arguments)]
pub fn bridge_requested_log(
    from: Address,
    to: Address,
    src_token: Address,
    dst_token: Address,
    src_amount: u64,
    dst_amount: u64,
    nonce: u64,
    position: LogPosition,
) -> RawLog {
    let event = BridgeRequested {
        from,
        to,
        srcToken: src_token,
        dstToken: dst_token,
        srcAmount: U256::from(src_amount),
        dstAmount: U256::from(dst_amount),
        nonce: U256::from(nonce),
        destChainId: U256::from(137u64),
    };
    let encoded = event.encode_log_data();

    RawLog {
        address: MockSource::CONTRACT,
        topics: encoded.topics().to_vec(),
        data: encoded.data,
        position,
        tx_hash: Some(B256::from(U256::from(position.block_number * 1_000 + position.log_index))),
    }
}

/// Intent as the decoder would build it (chain 1 → 137, amount 100 → 95)
pub fn sample_intent(nonce: u64, block: u64, log_index: u64) -> BridgeIntent {
    BridgeIntent {
        source_chain: 1,
        dest_chain: 137,
        from: Address::repeat_byte(0x0a),
        to: Address::repeat_byte(0x0b),
        src_token: Address::repeat_byte(0x11),
        dst_token: Address::repeat_byte(0x22),
        src_amount: U256::from(100),
        dst_amount: U256::from(95),
        nonce: U256::from(nonce),
        position: LogPosition::new(block, log_index),
        tx_hash: None,
    }
}

#[derive(Debug, Default)]
struct SourceState {
    head: u64,
    logs: Vec<RawLog>,
    queried: Vec<(u64, u64)>,
    fail_get_logs: u32,
    fail_head: u32,
}

/// Scripted source chain
#[derive(Debug)]
pub struct MockSource {
    chain_id: u64,
    state: Mutex<SourceState>,
}

impl MockSource {
    /// Address every log built by [`bridge_requested_log`] is emitted from
    pub const CONTRACT: Address = Address::new([0xcc; 20]);

    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Inclusive ranges passed to `get_logs`, in call order
    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().queried.clone()
    }

    pub fn fail_next_get_logs(&self, count: u32) {
        self.state.lock().unwrap().fail_get_logs = count;
    }

    pub fn fail_next_head(&self, count: u32) {
        self.state.lock().unwrap().fail_head = count;
    }
}

#[async_trait]
impl SourceChain for MockSource {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn current_head(&self) -> RelayResult<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_head > 0 {
            state.fail_head -= 1;
            return Err(RelayError::Transport("head request timed out".to_string()));
        }
        Ok(state.head)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: &[B256],
    ) -> RelayResult<Vec<RawLog>> {
        let mut state = self.state.lock().unwrap();
        state.queried.push((from_block, to_block));
        if state.fail_get_logs > 0 {
            state.fail_get_logs -= 1;
            return Err(RelayError::Transport("eth_getLogs: 503 Service Unavailable".to_string()));
        }

        // Like a real node, nothing past its own head is visible
        let head = state.head;
        Ok(state
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.position.block_number))
            .filter(|log| log.position.block_number <= head)
            .filter(|log| log.address == address)
            .filter(|log| {
                topics
                    .iter()
                    .enumerate()
                    .all(|(i, topic)| log.topics.get(i) == Some(topic))
            })
            .cloned()
            .collect())
    }
}

/// How the destination rejects a nonce that was already released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Gas estimation fails before broadcast
    Preflight,
    /// Transaction is mined and reverts
    Mined,
}

#[derive(Debug, Default)]
struct DestinationState {
    submitted: Vec<ReleaseCall>,
    released: Vec<ReleaseCall>,
    released_nonces: HashSet<U256>,
    receipts: HashMap<B256, Confirmation>,
    reverts: HashMap<U256, String>,
    fail_submissions: u32,
    fail_confirmations: u32,
    in_flight: usize,
    max_in_flight: usize,
    next_tx: u64,
}

/// Destination chain with nonce-keyed idempotent releases
#[derive(Debug)]
pub struct MockDestination {
    chain_id: u64,
    replay_mode: ReplayMode,
    state: Mutex<DestinationState>,
    gate: watch::Sender<bool>,
}

impl MockDestination {
    pub fn new(chain_id: u64) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            chain_id,
            replay_mode: ReplayMode::Preflight,
            state: Mutex::new(DestinationState::default()),
            gate,
        }
    }

    pub fn with_replay_mode(mut self, mode: ReplayMode) -> Self {
        self.replay_mode = mode;
        self
    }

    /// Releases that took effect, in order
    pub fn effective_releases(&self) -> Vec<ReleaseCall> {
        self.state.lock().unwrap().released.clone()
    }

    /// Every `submit` call, including rejected ones
    pub fn submitted(&self) -> Vec<ReleaseCall> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submit_attempts(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    /// Highest number of concurrently running `submit` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn fail_next_submissions(&self, count: u32) {
        self.state.lock().unwrap().fail_submissions = count;
    }

    pub fn fail_next_confirmations(&self, count: u32) {
        self.state.lock().unwrap().fail_confirmations = count;
    }

    /// Make every release of `nonce` revert with `reason`
    pub fn revert_nonce(&self, nonce: U256, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .reverts
            .insert(nonce, reason.to_string());
    }

    /// Hold every `submit` call until [`Self::unblock_submissions`]
    pub fn block_submissions(&self) {
        self.gate.send_replace(false);
    }

    pub fn unblock_submissions(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until at least `count` submissions have started
    pub async fn wait_for_submit_attempts(&self, count: usize) {
        for _ in 0..1_000 {
            if self.submit_attempts() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} submissions", count);
    }

    fn next_hash(state: &mut DestinationState) -> B256 {
        state.next_tx += 1;
        B256::from(U256::from(state.next_tx))
    }
}

#[async_trait]
impl DestinationChain for MockDestination {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit(&self, call: &ReleaseCall) -> RelayResult<TxHandle> {
        {
            let mut state = self.state.lock().unwrap();
            state.submitted.push(*call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(RelayError::Submission("connection reset by peer".to_string()));
        }

        let tx_hash = Self::next_hash(&mut state);
        let confirmation = if let Some(reason) = state.reverts.get(&call.nonce) {
            Confirmation::Reverted {
                reason: reason.clone(),
            }
        } else if state.released_nonces.contains(&call.nonce) {
            match self.replay_mode {
                ReplayMode::Preflight => {
                    return Err(RelayError::Submission(
                        "server returned an error response: error code 3: execution reverted: nonce already processed"
                            .to_string(),
                    ));
                }
                ReplayMode::Mined => Confirmation::Reverted {
                    reason: "nonce already processed".to_string(),
                },
            }
        } else {
            state.released_nonces.insert(call.nonce);
            state.released.push(*call);
            Confirmation::Success {
                block_number: Some(state.next_tx),
            }
        };

        state.receipts.insert(tx_hash, confirmation);
        Ok(TxHandle {
            tx_hash,
            call: *call,
        })
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> RelayResult<Confirmation> {
        let mut state = self.state.lock().unwrap();
        if state.fail_confirmations > 0 {
            state.fail_confirmations -= 1;
            return Err(RelayError::Submission(format!(
                "timed out waiting for receipt of {}",
                handle.tx_hash
            )));
        }
        state
            .receipts
            .get(&handle.tx_hash)
            .cloned()
            .ok_or_else(|| RelayError::Submission(format!("unknown transaction {}", handle.tx_hash)))
    }
}
