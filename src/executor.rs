//! Relay executor
//!
//! Submits the destination `release` call for a [`BridgeIntent`], waits for a
//! terminal confirmation and classifies failures. The nonce makes every
//! resubmission safe: a replayed nonce reverts on the destination and that
//! revert is reported as [`ExecutionOutcome::AlreadyReleased`].

use alloy::primitives::B256;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::metrics;
use crate::retry::{extract_revert_reason, ErrorClass, RetryConfig, RevertClassifier};
use crate::types::{BridgeIntent, Confirmation, ReleaseCall, TxHandle};

/// Write interface of a destination chain
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Native chain id, used for log context
    fn chain_id(&self) -> u64;

    /// Submit `release(token, to, amount, nonce)`. Returns once the
    /// transaction has been accepted by the network, not when mined.
    async fn submit(&self, call: &ReleaseCall) -> RelayResult<TxHandle>;

    /// Wait until the transaction is mined (success or revert)
    async fn await_confirmation(&self, handle: &TxHandle) -> RelayResult<Confirmation>;
}

/// Result of executing one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Release mined successfully
    Released { tx_hash: B256 },
    /// Destination reported the nonce as already released
    AlreadyReleased { reason: String },
    /// Retry budget for this round exhausted on transient failures
    Deferred { attempts: u32, error: RelayError },
    /// Genuine revert or permanent failure; needs an operator
    Escalated { reason: String },
}

impl ExecutionOutcome {
    /// Whether the intent needs no further relay work
    pub fn is_terminal_success(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Released { .. } | ExecutionOutcome::AlreadyReleased { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Released { .. } => "released",
            ExecutionOutcome::AlreadyReleased { .. } => "already_released",
            ExecutionOutcome::Deferred { .. } => "deferred",
            ExecutionOutcome::Escalated { .. } => "escalated",
        }
    }
}

/// Drives destination releases with bounded retry
pub struct RelayExecutor {
    destination: Arc<dyn DestinationChain>,
    retry: RetryConfig,
    classifier: RevertClassifier,
}

impl RelayExecutor {
    pub fn new(
        destination: Arc<dyn DestinationChain>,
        retry: RetryConfig,
        classifier: RevertClassifier,
    ) -> Self {
        Self {
            destination,
            retry,
            classifier,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Release one intent, retrying transient failures with exponential backoff
    pub async fn execute(&self, intent: &BridgeIntent) -> ExecutionOutcome {
        let outcome = self.drive(intent).await;
        metrics::record_release(intent.dest_chain, outcome.label());
        outcome
    }

    async fn drive(&self, intent: &BridgeIntent) -> ExecutionOutcome {
        let call = intent.release_call();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let err = match self.attempt(intent, &call).await {
                Ok(tx_hash) => {
                    info!(
                        source_chain = intent.source_chain,
                        dest_chain = intent.dest_chain,
                        block = intent.block_number(),
                        nonce = %intent.nonce,
                        tx_hash = %tx_hash,
                        "Release confirmed"
                    );
                    return ExecutionOutcome::Released { tx_hash };
                }
                Err(e) => e,
            };

            match self.classifier.classify(&err) {
                ErrorClass::BenignReplay => {
                    let reason = revert_reason(&err);
                    info!(
                        source_chain = intent.source_chain,
                        block = intent.block_number(),
                        nonce = %intent.nonce,
                        reason = %reason,
                        "Nonce already released on destination, treating as success"
                    );
                    return ExecutionOutcome::AlreadyReleased { reason };
                }
                ErrorClass::GenuineRevert | ErrorClass::Permanent => {
                    let reason = revert_reason(&err);
                    error!(
                        source_chain = intent.source_chain,
                        dest_chain = intent.dest_chain,
                        block = intent.block_number(),
                        nonce = %intent.nonce,
                        to = %call.to,
                        token = %call.token,
                        amount = %call.amount,
                        error_kind = err.kind(),
                        reason = %reason,
                        "Release failed permanently, escalating for operator intervention"
                    );
                    metrics::record_error(intent.dest_chain, err.kind());
                    return ExecutionOutcome::Escalated { reason };
                }
                ErrorClass::Transient => {
                    metrics::record_error(intent.dest_chain, err.kind());
                    if !self.retry.should_retry(attempts) {
                        warn!(
                            source_chain = intent.source_chain,
                            block = intent.block_number(),
                            nonce = %intent.nonce,
                            attempts,
                            error = %err,
                            "Release retry budget exhausted for this round, deferring"
                        );
                        return ExecutionOutcome::Deferred {
                            attempts,
                            error: err,
                        };
                    }

                    let backoff = self.retry.backoff_for_attempt(attempts - 1);
                    warn!(
                        source_chain = intent.source_chain,
                        block = intent.block_number(),
                        nonce = %intent.nonce,
                        attempt = attempts,
                        max = self.retry.max_attempts,
                        ?backoff,
                        error = %err,
                        "Release submission failed, retrying after backoff"
                    );
                    metrics::SUBMISSION_RETRIES.inc();
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One submit + confirm cycle
    async fn attempt(&self, intent: &BridgeIntent, call: &ReleaseCall) -> RelayResult<B256> {
        let handle = self
            .destination
            .submit(call)
            .await
            .map_err(normalize_submission_error)?;

        info!(
            dest_chain = self.destination.chain_id(),
            block = intent.block_number(),
            nonce = %intent.nonce,
            tx_hash = %handle.tx_hash,
            "Release submitted"
        );

        match self
            .destination
            .await_confirmation(&handle)
            .await
            .map_err(normalize_submission_error)?
        {
            Confirmation::Success { .. } => Ok(handle.tx_hash),
            Confirmation::Reverted { reason } => {
                info!(
                    tx_hash = %handle.tx_hash,
                    nonce = %intent.nonce,
                    reason = %reason,
                    "Release transaction reverted"
                );
                Err(RelayError::execution(reason))
            }
        }
    }
}

/// Pre-flight reverts surface as submission errors on most nodes; reclassify
/// them so the revert reason is judged like a mined revert.
fn normalize_submission_error(err: RelayError) -> RelayError {
    match &err {
        RelayError::Submission(msg) | RelayError::Transport(msg) => match extract_revert_reason(msg)
        {
            Some(reason) => RelayError::execution(reason),
            None => err,
        },
        _ => err,
    }
}

fn revert_reason(err: &RelayError) -> String {
    match err {
        RelayError::Execution { reason } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_intent, MockDestination, ReplayMode};
    use alloy::primitives::U256;
    use std::time::Duration;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            max_deferred_rounds: 3,
        }
    }

    fn executor(dest: Arc<MockDestination>, max_attempts: u32) -> RelayExecutor {
        RelayExecutor::new(dest, fast_retry(max_attempts), RevertClassifier::default())
    }

    #[tokio::test]
    async fn test_release_called_with_mapped_arguments() {
        let dest = Arc::new(MockDestination::new(137));
        let intent = sample_intent(7, 1000, 0);

        let outcome = executor(dest.clone(), 3).execute(&intent).await;
        assert!(matches!(outcome, ExecutionOutcome::Released { .. }));

        let releases = dest.effective_releases();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].token, intent.dst_token);
        assert_eq!(releases[0].to, intent.to);
        assert_eq!(releases[0].amount, U256::from(95));
        assert_eq!(releases[0].nonce, U256::from(7));
    }

    #[tokio::test]
    async fn test_outcomes_recorded_by_label() {
        let dest = Arc::new(MockDestination::new(909_101));
        let mut intent = sample_intent(8, 1000, 0);
        intent.dest_chain = 909_101;
        let executor = executor(dest, 3);

        let first = executor.execute(&intent).await;
        let second = executor.execute(&intent).await;
        assert_eq!(first.label(), "released");
        assert_eq!(second.label(), "already_released");

        for label in ["released", "already_released"] {
            let count = metrics::RELEASES
                .with_label_values(&["909101", label])
                .get();
            assert_eq!(count, 1.0);
        }
    }

    #[tokio::test]
    async fn test_same_nonce_twice_has_one_effect() {
        for mode in [ReplayMode::Preflight, ReplayMode::Mined] {
            let dest = Arc::new(MockDestination::new(137).with_replay_mode(mode));
            let exec = executor(dest.clone(), 3);
            let intent = sample_intent(7, 1000, 0);

            let first = exec.execute(&intent).await;
            let second = exec.execute(&intent).await;

            assert!(matches!(first, ExecutionOutcome::Released { .. }));
            assert!(
                matches!(second, ExecutionOutcome::AlreadyReleased { .. }),
                "mode {:?} gave {:?}",
                mode,
                second
            );
            assert!(second.is_terminal_success());
            assert_eq!(dest.effective_releases().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dest = Arc::new(MockDestination::new(137));
        dest.fail_next_submissions(2);

        let outcome = executor(dest.clone(), 5).execute(&sample_intent(1, 10, 0)).await;
        assert!(matches!(outcome, ExecutionOutcome::Released { .. }));
        assert_eq!(dest.submit_attempts(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_defers() {
        let dest = Arc::new(MockDestination::new(137));
        dest.fail_next_submissions(10);

        let outcome = executor(dest.clone(), 3).execute(&sample_intent(1, 10, 0)).await;
        match outcome {
            ExecutionOutcome::Deferred { attempts, error } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.kind(), "submission");
            }
            other => panic!("expected deferral, got {:?}", other),
        }
        assert_eq!(dest.submit_attempts(), 3);
        assert!(dest.effective_releases().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_retried() {
        let dest = Arc::new(MockDestination::new(137));
        dest.fail_next_confirmations(1);

        let outcome = executor(dest.clone(), 3).execute(&sample_intent(4, 10, 0)).await;
        // First transaction was mined despite the lost confirmation; the
        // resubmission is rejected as a replay.
        assert!(outcome.is_terminal_success());
        assert_eq!(dest.effective_releases().len(), 1);
    }

    #[tokio::test]
    async fn test_genuine_revert_escalates_without_retry() {
        let dest = Arc::new(MockDestination::new(137));
        dest.revert_nonce(U256::from(9), "insufficient liquidity");

        let outcome = executor(dest.clone(), 5).execute(&sample_intent(9, 10, 0)).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Escalated {
                reason: "insufficient liquidity".to_string()
            }
        );
        assert_eq!(dest.submit_attempts(), 1);
    }

    #[test]
    fn test_normalize_preflight_revert() {
        let err = normalize_submission_error(RelayError::Submission(
            "error code 3: execution reverted: nonce already processed".to_string(),
        ));
        assert_eq!(err, RelayError::execution("nonce already processed"));

        let err = normalize_submission_error(RelayError::Submission("timeout".to_string()));
        assert_eq!(err, RelayError::Submission("timeout".to_string()));
    }
}
