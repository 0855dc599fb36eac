//! Relay loop
//!
//! `RelayCore` runs one poll → decode → execute → checkpoint round.
//! `RelayLoop` schedules rounds on a fixed cadence and guarantees that two
//! rounds never overlap: each tick takes the core's mutex with `try_lock`,
//! and a tick that finds it held is skipped.
//!
//! Checkpoint policy: the stored checkpoint only moves past a block once every
//! intent decoded from it is terminal. Intents in the retry queue or the
//! escalation list hold it at `block - 1`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::decoder::EventDecoder;
use crate::error::{RelayError, RelayResult};
use crate::executor::{ExecutionOutcome, RelayExecutor};
use crate::metrics;
use crate::retry::RetryConfig;
use crate::types::{BridgeIntent, RoundState};
use crate::watcher::LogWatcher;

/// Intent waiting in the retry queue
#[derive(Debug, Clone)]
struct PendingIntent {
    intent: BridgeIntent,
    /// Rounds this intent has been deferred so far
    deferrals: u32,
    retry_after: Option<DateTime<Utc>>,
    last_error: RelayError,
}

/// Intent that needs operator intervention
#[derive(Debug, Clone, Serialize)]
pub struct EscalatedIntent {
    pub intent: BridgeIntent,
    pub reason: String,
    pub escalated_at: DateTime<Utc>,
}

/// Summary of one relay round
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundReport {
    /// First block scanned this round, if any
    pub from_block: Option<u64>,
    /// Last block scanned this round, if any
    pub to_block: Option<u64>,
    pub logs_found: usize,
    pub decode_failures: usize,
    pub released: usize,
    pub already_released: usize,
    pub deferred: usize,
    pub escalated: usize,
    /// Deferred intents re-attempted at the start of the round
    pub retried: usize,
    pub checkpoint: u64,
    pub duration_ms: u64,
}

/// Relay state shared with the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub relay_key: String,
    pub source_chain: u64,
    pub dest_chain: u64,
    pub state: RoundState,
    pub checkpoint: u64,
    pub scan_cursor: u64,
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    pub skipped_ticks: u64,
    pub deferred: usize,
    pub escalated: Vec<EscalatedIntent>,
    pub last_round: Option<RoundReport>,
    pub last_error: Option<String>,
    pub last_round_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl RelayStatus {
    pub fn new(relay_key: &str, source_chain: u64, dest_chain: u64) -> Self {
        Self {
            relay_key: relay_key.to_string(),
            source_chain,
            dest_chain,
            state: RoundState::Idle,
            checkpoint: 0,
            scan_cursor: 0,
            rounds_completed: 0,
            rounds_failed: 0,
            skipped_ticks: 0,
            deferred: 0,
            escalated: Vec::new(),
            last_round: None,
            last_error: None,
            last_round_at: None,
            started_at: Utc::now(),
        }
    }

    /// Ready once a round has completed successfully
    pub fn is_ready(&self) -> bool {
        self.rounds_completed > 0
    }
}

pub type SharedStatus = Arc<RwLock<RelayStatus>>;

/// Checkpoint to store when none exists yet.
///
/// Scanning starts at `START_BLOCK`, else the contract's deployment block,
/// else the current safe head (nothing older is relayed).
pub async fn initial_checkpoint(
    start_block: Option<u64>,
    deploy_block: Option<u64>,
    watcher: &LogWatcher,
) -> RelayResult<u64> {
    let start = match start_block.or(deploy_block) {
        Some(block) => block,
        None => watcher.safe_head().await?,
    };
    Ok(start.saturating_sub(1))
}

/// Checkpoint to resume from: the stored value when one exists, otherwise
/// [`initial_checkpoint`], retrying transient head lookups with backoff.
pub async fn start_checkpoint(
    store: &dyn CheckpointStore,
    key: &str,
    start_block: Option<u64>,
    deploy_block: Option<u64>,
    watcher: &LogWatcher,
    retry: &RetryConfig,
) -> RelayResult<u64> {
    if let Some(stored) = store.load(key).await? {
        return Ok(stored);
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        match initial_checkpoint(start_block, deploy_block, watcher).await {
            Ok(checkpoint) => return Ok(checkpoint),
            Err(e) if e.is_retryable() && retry.should_retry(attempts) => {
                let backoff = retry.backoff_for_attempt(attempts - 1);
                warn!(
                    relay_key = %key,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Start block lookup failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One source → destination route
pub struct RelayCore {
    key: String,
    watcher: LogWatcher,
    decoder: EventDecoder,
    executor: RelayExecutor,
    store: Arc<dyn CheckpointStore>,
    checkpoint: u64,
    /// Last block fetched and handed to the executor. May run ahead of the
    /// checkpoint while intents are unresolved.
    scan_cursor: u64,
    retry_queue: Vec<PendingIntent>,
    escalated: Vec<EscalatedIntent>,
    status: SharedStatus,
}

impl RelayCore {
    /// Load (or initialise) the checkpoint and build the core
    pub async fn init(
        key: String,
        watcher: LogWatcher,
        decoder: EventDecoder,
        executor: RelayExecutor,
        store: Arc<dyn CheckpointStore>,
        default_checkpoint: u64,
        status: SharedStatus,
    ) -> RelayResult<Self> {
        let checkpoint = store.load_or_default(&key, default_checkpoint).await?;

        info!(
            relay_key = %key,
            checkpoint,
            resume_from = checkpoint + 1,
            "Loaded relay checkpoint"
        );
        metrics::set_checkpoint(watcher.chain_id(), checkpoint);

        {
            let mut s = status.write().await;
            s.checkpoint = checkpoint;
            s.scan_cursor = checkpoint;
        }

        Ok(Self {
            key,
            watcher,
            decoder,
            executor,
            store,
            checkpoint,
            scan_cursor: checkpoint,
            retry_queue: Vec::new(),
            escalated: Vec::new(),
            status,
        })
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn scan_cursor(&self) -> u64 {
        self.scan_cursor
    }

    pub fn deferred_len(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn escalated(&self) -> &[EscalatedIntent] {
        &self.escalated
    }

    /// Run one full round: retry deferred intents, scan new windows, advance
    /// the checkpoint.
    pub async fn run_round(&mut self) -> RelayResult<RoundReport> {
        let started = Instant::now();
        let mut report = RoundReport::default();

        self.status.write().await.state = RoundState::Processing;
        info!(
            relay_key = %self.key,
            checkpoint = self.checkpoint,
            scan_cursor = self.scan_cursor,
            deferred = self.retry_queue.len(),
            escalated = self.escalated.len(),
            "Relay round started"
        );

        self.retry_deferred(&mut report).await;
        let scanned = self.scan(&mut report).await;
        // Fold in whatever was completed even when the scan failed part-way
        let advanced = self.advance_checkpoint().await;

        report.checkpoint = self.checkpoint;
        report.duration_ms = started.elapsed().as_millis() as u64;
        metrics::set_queue_sizes(self.retry_queue.len(), self.escalated.len());

        let result = scanned.and(advanced);
        self.publish(&report, result.as_ref().err()).await;
        metrics::record_round(result.is_ok(), started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                info!(
                    from_block = ?report.from_block,
                    to_block = ?report.to_block,
                    logs = report.logs_found,
                    released = report.released,
                    already_released = report.already_released,
                    deferred = report.deferred,
                    escalated = report.escalated,
                    decode_failures = report.decode_failures,
                    checkpoint = report.checkpoint,
                    duration_ms = report.duration_ms,
                    "Relay round complete"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_error(self.watcher.chain_id(), e.kind());
                Err(e)
            }
        }
    }

    /// Re-attempt retry-queue entries whose backoff has elapsed
    async fn retry_deferred(&mut self, report: &mut RoundReport) {
        if self.retry_queue.is_empty() {
            return;
        }

        let queue = std::mem::take(&mut self.retry_queue);
        for pending in queue {
            if !self
                .executor
                .retry_config()
                .is_ready_for_retry(pending.retry_after)
            {
                self.retry_queue.push(pending);
                continue;
            }

            debug!(
                block = pending.intent.block_number(),
                nonce = %pending.intent.nonce,
                deferrals = pending.deferrals,
                last_error = %pending.last_error,
                "Retrying deferred intent"
            );
            report.retried += 1;
            self.execute(pending.intent, pending.deferrals, report).await;
        }
        self.retry_queue.sort_by_key(|p| p.intent.position);
    }

    /// Scan every window between the scan cursor and the safe head
    async fn scan(&mut self, report: &mut RoundReport) -> RelayResult<()> {
        let chain_id = self.watcher.chain_id();
        let safe_head = self.watcher.safe_head().await?;

        while let Some((from, to)) = self.watcher.next_window(self.scan_cursor, safe_head) {
            let logs = self.watcher.fetch(from, to).await?;

            info!(
                chain_id,
                from_block = from,
                to_block = to,
                count = logs.len(),
                "Logs found"
            );
            metrics::record_logs_found(chain_id, logs.len());
            report.from_block.get_or_insert(from);
            report.to_block = Some(to);
            report.logs_found += logs.len();

            for log in &logs {
                match self.decoder.decode(log) {
                    Ok(intent) => {
                        info!(
                            chain_id,
                            block = intent.block_number(),
                            log_index = intent.position.log_index,
                            nonce = %intent.nonce,
                            from = %intent.from,
                            to = %intent.to,
                            src_token = %intent.src_token,
                            dst_token = %intent.dst_token,
                            src_amount = %intent.src_amount,
                            dst_amount = %intent.dst_amount,
                            "Intent decoded"
                        );
                        metrics::record_intent_decoded(chain_id);
                        self.execute(intent, 0, report).await;
                    }
                    Err(e) => {
                        // Dropped: the block still counts as processed
                        error!(
                            chain_id,
                            position = %log.position,
                            tx_hash = ?log.tx_hash,
                            error = %e,
                            "Dropping undecodable BridgeRequested log; check bridge address and ABI version"
                        );
                        metrics::record_decode_failure(chain_id);
                        metrics::record_error(chain_id, e.kind());
                        report.decode_failures += 1;
                    }
                }
            }

            self.scan_cursor = to;
        }

        Ok(())
    }

    /// Execute one intent and file it by outcome
    async fn execute(&mut self, intent: BridgeIntent, deferrals: u32, report: &mut RoundReport) {
        match self.executor.execute(&intent).await {
            ExecutionOutcome::Released { .. } => report.released += 1,
            ExecutionOutcome::AlreadyReleased { .. } => report.already_released += 1,
            ExecutionOutcome::Deferred { attempts, error } => {
                let retry = self.executor.retry_config();
                if retry.may_defer(deferrals) {
                    let deferrals = deferrals + 1;
                    let retry_after = retry.next_retry_after(deferrals);
                    warn!(
                        block = intent.block_number(),
                        nonce = %intent.nonce,
                        attempts,
                        deferrals,
                        %retry_after,
                        error = %error,
                        "Intent deferred to retry queue; checkpoint held"
                    );
                    report.deferred += 1;
                    self.retry_queue.push(PendingIntent {
                        intent,
                        deferrals,
                        retry_after: Some(retry_after),
                        last_error: error,
                    });
                } else {
                    let reason = format!(
                        "retry budget exhausted after {} deferred rounds: {}",
                        deferrals, error
                    );
                    self.escalate(intent, reason, report);
                }
            }
            ExecutionOutcome::Escalated { reason } => self.escalate(intent, reason, report),
        }
    }

    fn escalate(&mut self, intent: BridgeIntent, reason: String, report: &mut RoundReport) {
        error!(
            source_chain = intent.source_chain,
            dest_chain = intent.dest_chain,
            block = intent.block_number(),
            log_index = intent.position.log_index,
            tx_hash = ?intent.tx_hash,
            nonce = %intent.nonce,
            reason = %reason,
            "Intent escalated; checkpoint held until operator intervention or restart"
        );
        report.escalated += 1;
        self.escalated.push(EscalatedIntent {
            intent,
            reason,
            escalated_at: Utc::now(),
        });
    }

    /// Lowest block with an unresolved intent, if any
    fn held_block(&self) -> Option<u64> {
        self.retry_queue
            .iter()
            .map(|p| p.intent.block_number())
            .chain(self.escalated.iter().map(|e| e.intent.block_number()))
            .min()
    }

    /// Checkpoint value the current state allows
    fn checkpoint_target(&self) -> u64 {
        match self.held_block() {
            Some(block) => block.saturating_sub(1).min(self.scan_cursor),
            None => self.scan_cursor,
        }
    }

    async fn advance_checkpoint(&mut self) -> RelayResult<()> {
        let target = self.checkpoint_target();
        if target <= self.checkpoint {
            if let Some(block) = self.held_block() {
                debug!(
                    checkpoint = self.checkpoint,
                    held_at = block,
                    "Checkpoint held by unresolved intent"
                );
            }
            return Ok(());
        }

        let stored = self
            .store
            .compare_and_set(&self.key, self.checkpoint, target)
            .await?;
        if !stored {
            return Err(RelayError::Checkpoint(format!(
                "checkpoint {} changed by another writer (expected {})",
                self.key, self.checkpoint
            )));
        }

        debug!(from = self.checkpoint, to = target, "Checkpoint advanced");
        self.checkpoint = target;
        metrics::set_checkpoint(self.watcher.chain_id(), target);
        Ok(())
    }

    async fn publish(&self, report: &RoundReport, error: Option<&RelayError>) {
        let mut s = self.status.write().await;
        s.state = RoundState::Idle;
        s.checkpoint = self.checkpoint;
        s.scan_cursor = self.scan_cursor;
        s.deferred = self.retry_queue.len();
        s.escalated = self.escalated.clone();
        s.last_round = Some(report.clone());
        s.last_round_at = Some(Utc::now());
        match error {
            Some(e) => {
                s.rounds_failed += 1;
                s.last_error = Some(e.to_string());
            }
            None => {
                s.rounds_completed += 1;
                s.last_error = None;
            }
        }
    }
}

/// Fixed-cadence scheduler for a [`RelayCore`]
pub struct RelayLoop {
    core: Arc<Mutex<RelayCore>>,
    status: SharedStatus,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl RelayLoop {
    pub fn new(core: RelayCore, poll_interval: Duration, shutdown_grace: Duration) -> Self {
        let status = core.status.clone();
        Self {
            core: Arc::new(Mutex::new(core)),
            status,
            poll_interval,
            shutdown_grace,
        }
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> eyre::Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Relay loop starting"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    match self.core.clone().try_lock_owned() {
                        Ok(guard) => {
                            in_flight = Some(tokio::spawn(Self::round(guard)));
                        }
                        Err(_) => {
                            metrics::SKIPPED_TICKS.inc();
                            self.status.write().await.skipped_ticks += 1;
                            debug!("Previous round still processing, skipping tick");
                        }
                    }
                }
            }
        }

        if let Some(handle) = in_flight.filter(|h| !h.is_finished()) {
            info!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Waiting for in-flight round to finish"
            );
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(_) => info!("In-flight round finished"),
                Err(_) => {
                    // Resubmission after restart is safe: releases are nonce-keyed
                    warn!("Shutdown grace period elapsed, abandoning in-flight round");
                    abort.abort();
                }
            }
        }

        metrics::UP.set(0.0);
        info!("Relay loop stopped");
        Ok(())
    }

    async fn round(mut core: OwnedMutexGuard<RelayCore>) {
        if let Err(e) = core.run_round().await {
            warn!(
                error = %e,
                kind = e.kind(),
                checkpoint = core.checkpoint(),
                "Relay round failed; will retry next tick"
            );
        }
    }
}
