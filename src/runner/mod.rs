use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{RoundLimit, Settings};
use crate::db::Connector;
use crate::ops::{FailureKind, OperationKind, Outcome};
use crate::worker::Worker;

pub const FAILURE_SAMPLE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub round: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub failure_sample: Vec<String>,
    pub affected_rows: u64,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
}

impl RoundResult {
    /// Folds outcomes in completion order. Anything submitted that produced no
    /// outcome is counted as a failure, so `succeeded + failed == total`.
    pub fn from_outcomes(
        round: u64,
        total: usize,
        outcomes: impl IntoIterator<Item = Outcome>,
        elapsed: Duration,
    ) -> Self {
        let mut succeeded = 0;
        let mut failure_sample = Vec::new();
        let mut affected_rows = 0;
        let mut failures_by_kind = BTreeMap::new();

        for outcome in outcomes {
            affected_rows += outcome.affected_rows.unwrap_or(0);
            if outcome.is_success() {
                succeeded += 1;
                continue;
            }
            if let Some(kind) = outcome.failure {
                *failures_by_kind.entry(kind).or_insert(0) += 1;
                if failure_sample.len() < FAILURE_SAMPLE_SIZE {
                    failure_sample.push(outcome.message);
                }
            }
        }

        Self {
            round,
            total,
            succeeded,
            failed: total.saturating_sub(succeeded),
            elapsed,
            failure_sample,
            affected_rows,
            failures_by_kind,
        }
    }
}

/// Receives round boundaries as they happen.
pub trait RoundObserver {
    fn round_started(&mut self, _round: u64) {}

    fn round_finished(&mut self, result: &RoundResult);
}

impl<F: FnMut(&RoundResult)> RoundObserver for F {
    fn round_finished(&mut self, result: &RoundResult) {
        self(result)
    }
}

pub struct Runner<C: Connector> {
    worker: Arc<Worker<C>>,
    operation: OperationKind,
    concurrency: usize,
    total: usize,
    rounds: RoundLimit,
}

impl<C: Connector> Runner<C> {
    pub fn new(worker: Worker<C>, settings: &Settings) -> Self {
        Self {
            worker: Arc::new(worker),
            operation: settings.operation,
            concurrency: settings.concurrency.max(1),
            total: settings.total,
            rounds: settings.rounds,
        }
    }

    /// Runs rounds until the limit is reached or `cancel` fires. Cancellation is
    /// only checked between rounds: a round in flight always completes and is
    /// reported to `observer`. Returns the number of completed rounds.
    pub async fn run(&self, cancel: &CancellationToken, observer: &mut impl RoundObserver) -> u64 {
        let mut round = 1;
        while self.rounds.allows(round) {
            if cancel.is_cancelled() {
                info!("Stopping before round {}", round);
                break;
            }

            observer.round_started(round);
            let result = self.run_round(round).await;
            observer.round_finished(&result);
            round += 1;
        }
        round - 1
    }

    /// Submits `total` operations, at most `concurrency` at a time, and waits
    /// for every one of them.
    pub async fn run_round(&self, round: u64) -> RoundResult {
        debug!(
            "Round {}: submitting {} {} operations at concurrency {}",
            round, self.total, self.operation, self.concurrency
        );

        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let start = Instant::now();

        for _ in 0..self.total {
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let worker = self.worker.clone();
            let kind = self.operation;
            tasks.spawn(async move {
                let outcome = worker.run(kind).await;
                drop(permit);
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(self.total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Operation task failed: {}", e);
                    outcomes.push(Outcome::failed(
                        Some(self.operation),
                        FailureKind::Panicked,
                        format!("{} failed: task aborted: {}", self.operation, e),
                    ));
                }
            }
        }

        let result = RoundResult::from_outcomes(round, self.total, outcomes, start.elapsed());
        let (idle, checked_out) = self.worker.pool().occupancy().await;
        debug!(
            "Pool after round {}: {} idle, {} checked out",
            round, idle, checked_out
        );
        info!(
            "Round {} done in {:.2}s: {} ok, {} failed",
            round,
            result.elapsed.as_secs_f64(),
            result.succeeded,
            result.failed
        );
        result
    }
}
