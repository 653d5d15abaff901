//! Periodic alert evaluation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use airstation_core::{AlertEvaluator, Result, RetryConfig, TickOutcome, with_retry};

/// Counters and the last result of the evaluation loop.
#[derive(Debug, Default)]
pub struct EvaluationStats {
    ticks: AtomicU64,
    failures: AtomicU64,
    last: Mutex<Option<LastRun>>,
}

#[derive(Debug, Clone)]
struct LastRun {
    at: OffsetDateTime,
    outcome: std::result::Result<TickOutcome, String>,
}

/// Serializable view of [`EvaluationStats`].
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationStatus {
    pub ticks_run: u64,
    pub failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    pub last_outcome: Option<TickOutcome>,
    pub last_error: Option<String>,
}

impl EvaluationStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: &Result<TickOutcome>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let outcome = match outcome {
            Ok(outcome) => Ok(*outcome),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e.to_string())
            }
        };
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(LastRun {
            at: OffsetDateTime::now_utc(),
            outcome,
        });
    }

    pub fn status(&self) -> EvaluationStatus {
        let last = self.last.lock().unwrap_or_else(|p| p.into_inner()).clone();
        EvaluationStatus {
            ticks_run: self.ticks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_run_at: last.as_ref().map(|run| run.at),
            last_outcome: last.as_ref().and_then(|run| run.outcome.clone().ok()),
            last_error: last.and_then(|run| run.outcome.err()),
        }
    }
}

/// Runs the evaluator on a fixed period.
///
/// A tick that comes due while the previous one is still running is kept
/// pending and fired once, never duplicated. Retryable failures are retried
/// with backoff before the loop waits for the next period.
pub struct EvaluationScheduler {
    evaluator: Arc<AlertEvaluator>,
    period: Duration,
    retry: RetryConfig,
    stats: Arc<EvaluationStats>,
}

impl EvaluationScheduler {
    pub fn new(evaluator: Arc<AlertEvaluator>, period: Duration, retry: RetryConfig) -> Self {
        Self {
            evaluator,
            period,
            retry,
            stats: Arc::new(EvaluationStats::new()),
        }
    }

    /// Share an existing stats block, e.g. the one exposed over HTTP.
    pub fn with_stats(mut self, stats: Arc<EvaluationStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<EvaluationStats> {
        &self.stats
    }

    /// One evaluation with retries, recorded in the stats.
    pub async fn run_once(&self) -> Result<TickOutcome> {
        let evaluator = &self.evaluator;
        let result = with_retry(&self.retry, "Alert evaluation", move || evaluator.tick()).await;
        self.stats.record(&result);
        result
    }

    /// Evaluate every period until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Evaluating alerts every {:?}", self.period);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_once() => result,
            };

            match result {
                Ok(TickOutcome::AlreadyRunning) => {
                    warn!("Previous evaluation still running, tick skipped");
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    error!("Evaluation failed after retries: {}", e);
                }
                Err(e) => error!("Evaluation failed: {}", e),
            }
        }

        info!("Evaluation scheduler stopped");
    }
}
