//! Retry and backoff policy for destination submissions
//!
//! Provides exponential backoff, failure classification and the benign-replay
//! revert classifier.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::RelayError;

/// Default revert reasons meaning "this nonce was already released"
pub const DEFAULT_BENIGN_REVERT_REASONS: &[&str] = &[
    "nonce already processed",
    "nonce already used",
    "already released",
    "already processed",
];

/// Submission retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per intent within one round (first try included)
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Rounds an intent may spend in the retry queue before escalation
    pub max_deferred_rounds: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_deferred_rounds: 30,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if another in-round attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Check if a deferred intent may stay queued after `rounds` deferrals
    pub fn may_defer(&self, rounds: u32) -> bool {
        rounds < self.max_deferred_rounds
    }

    /// Earliest time a deferred intent should be re-attempted
    pub fn next_retry_after(&self, rounds: u32) -> DateTime<Utc> {
        let backoff = self.backoff_for_attempt(rounds);
        Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::seconds(60))
    }

    /// Check if a deferred intent is ready for retry based on retry_after
    pub fn is_ready_for_retry(&self, retry_after: Option<DateTime<Utc>>) -> bool {
        match retry_after {
            Some(time) => Utc::now() >= time,
            None => true,
        }
    }
}

/// Classifies failures for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure - retry with backoff
    Transient,
    /// Revert proving the release already happened - treat as success
    BenignReplay,
    /// Revert for any other reason - escalate
    GenuineRevert,
    /// Non-retryable, not a revert (decode/config)
    Permanent,
}

/// Classifies destination revert reasons
#[derive(Debug, Clone)]
pub struct RevertClassifier {
    benign_patterns: Vec<String>,
}

impl Default for RevertClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_REVERT_REASONS.iter().map(|s| s.to_string()))
    }
}

impl RevertClassifier {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            benign_patterns: patterns
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether a revert reason means the nonce was already released
    pub fn is_benign_replay(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.benign_patterns.iter().any(|p| reason.contains(p))
    }

    /// Classify a relay error for retry decisions
    pub fn classify(&self, error: &RelayError) -> ErrorClass {
        match error {
            RelayError::Execution { reason } => {
                if self.is_benign_replay(reason) {
                    ErrorClass::BenignReplay
                } else {
                    ErrorClass::GenuineRevert
                }
            }
            RelayError::Transport(_) | RelayError::Submission(_) | RelayError::Checkpoint(_) => {
                ErrorClass::Transient
            }
            RelayError::Decode(_) | RelayError::Config(_) => ErrorClass::Permanent,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.benign_patterns
    }
}

/// Recognise a revert hidden inside a transport-level error message.
///
/// Gas estimation on EVM nodes fails with "execution reverted: <reason>"
/// before a transaction is ever broadcast.
pub fn extract_revert_reason(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    let idx = lower.find("execution reverted")?;
    let rest = &message[idx + "execution reverted".len()..];
    let reason = rest.trim_start_matches([':', ' ']).trim();
    let reason = reason
        .split([',', '\n'])
        .next()
        .unwrap_or_default()
        .trim_matches(['"', '\''])
        .trim();
    if reason.is_empty() {
        Some("execution reverted".to_string())
    } else {
        Some(reason.to_string())
    }
}
