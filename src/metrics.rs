//! Prometheus metrics for the bridge relayer
//!
//! Exposed on the /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, Counter, CounterVec, Gauge, GaugeVec, Histogram,
};

lazy_static! {
    // Round metrics
    pub static ref ROUNDS: CounterVec = register_counter_vec!(
        "bridge_relayer_rounds_total",
        "Total number of relay rounds by result",
        &["result"]
    ).unwrap();

    pub static ref SKIPPED_TICKS: Counter = register_counter!(
        "bridge_relayer_skipped_ticks_total",
        "Ticks skipped because the previous round was still processing"
    ).unwrap();

    pub static ref ROUND_DURATION: Histogram = register_histogram!(
        "bridge_relayer_round_duration_seconds",
        "Wall time of a relay round",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Source metrics
    pub static ref LOGS_FOUND: CounterVec = register_counter_vec!(
        "bridge_relayer_logs_found_total",
        "Total number of BridgeRequested logs fetched",
        &["chain"]
    ).unwrap();

    pub static ref INTENTS_DECODED: CounterVec = register_counter_vec!(
        "bridge_relayer_intents_decoded_total",
        "Total number of logs decoded into intents",
        &["chain"]
    ).unwrap();

    pub static ref DECODE_FAILURES: CounterVec = register_counter_vec!(
        "bridge_relayer_decode_failures_total",
        "Total number of logs dropped because they failed to decode",
        &["chain"]
    ).unwrap();

    // Destination metrics
    pub static ref RELEASES: CounterVec = register_counter_vec!(
        "bridge_relayer_releases_total",
        "Release executions by outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SUBMISSION_RETRIES: Counter = register_counter!(
        "bridge_relayer_submission_retries_total",
        "In-round release resubmissions after a transient failure"
    ).unwrap();

    // Progress
    pub static ref CHECKPOINT: GaugeVec = register_gauge_vec!(
        "bridge_relayer_checkpoint_block",
        "Last fully processed source block",
        &["chain"]
    ).unwrap();

    pub static ref ESCALATED: Gauge = register_gauge!(
        "bridge_relayer_escalated_intents",
        "Intents awaiting operator intervention"
    ).unwrap();

    pub static ref DEFERRED: Gauge = register_gauge!(
        "bridge_relayer_deferred_intents",
        "Intents waiting in the retry queue"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "bridge_relayer_errors_total",
        "Total number of errors by kind",
        &["chain", "kind"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "bridge_relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a finished round
pub fn record_round(success: bool, seconds: f64) {
    let result = if success { "success" } else { "failure" };
    ROUNDS.with_label_values(&[result]).inc();
    ROUND_DURATION.observe(seconds);
}

/// Record fetched logs
pub fn record_logs_found(chain: u64, count: usize) {
    LOGS_FOUND
        .with_label_values(&[chain.to_string().as_str()])
        .inc_by(count as f64);
}

pub fn record_intent_decoded(chain: u64) {
    INTENTS_DECODED.with_label_values(&[chain.to_string().as_str()]).inc();
}

pub fn record_decode_failure(chain: u64) {
    DECODE_FAILURES.with_label_values(&[chain.to_string().as_str()]).inc();
}

/// Record a release outcome
pub fn record_release(chain: u64, outcome: &str) {
    RELEASES
        .with_label_values(&[chain.to_string().as_str(), outcome])
        .inc();
}

/// Record an error
pub fn record_error(chain: u64, kind: &str) {
    ERRORS.with_label_values(&[chain.to_string().as_str(), kind]).inc();
}

pub fn set_checkpoint(chain: u64, block: u64) {
    CHECKPOINT
        .with_label_values(&[chain.to_string().as_str()])
        .set(block as f64);
}

/// Update retry queue and escalation sizes
pub fn set_queue_sizes(deferred: usize, escalated: usize) {
    DEFERRED.set(deferred as f64);
    ESCALATED.set(escalated as f64);
}
