//! BatchOrchestrator - many repair loops at once
//!
//! Each problem runs on its own task behind a semaphore permit. Results come
//! back in completion order and are put back into input order before the run
//! is finalized.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::domain::{BatchEntry, BatchRun, ExhaustionReason, ProblemSpec, SolveResult};
use crate::events::OrEvent;
use crate::repair::RepairEngine;

use super::evaluate::{DEFAULT_TOLERANCE, evaluate};

/// Runs repair loops concurrently over a list of problems
pub struct BatchOrchestrator {
    engine: Arc<RepairEngine>,
    tolerance: f64,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<RepairEngine>) -> Self {
        debug!("BatchOrchestrator::new: called");
        Self {
            engine,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Absolute tolerance for numeric ground-truth comparison
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Solve every problem, at most `concurrency_limit` at a time
    ///
    /// Entries come back in the order of `problems`. A task that panics or is
    /// cancelled yields an `internal` exhaustion for its own entry only.
    pub async fn run(
        &self,
        problems: Vec<ProblemSpec>,
        concurrency_limit: usize,
        max_attempts: u32,
        model_id: &str,
    ) -> BatchRun {
        let total = problems.len();
        debug!(total, concurrency_limit, max_attempts, %model_id, "BatchOrchestrator::run: called");
        info!(
            "Starting batch of {} problems (concurrency: {}, max_attempts: {})",
            total, concurrency_limit, max_attempts
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let mut in_flight = FuturesUnordered::new();

        for (idx, problem) in problems.iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let problem = problem.clone();
            let model_id = model_id.to_string();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(idx, problem_id = %problem.id, "BatchOrchestrator::run: permit acquired");
                engine.solve(&problem, max_attempts, &model_id).await
            });
            in_flight.push(async move { (idx, handle.await) });
        }

        let mut results: Vec<Option<SolveResult>> = vec![None; total];
        let mut completed = 0;
        let mut solved = 0;

        while let Some((idx, joined)) = in_flight.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let message = if e.is_panic() {
                        "solver task panicked".to_string()
                    } else {
                        "solver task was cancelled".to_string()
                    };
                    warn!("Problem at position {}: {}", idx, message);
                    SolveResult::Exhausted {
                        attempts: vec![],
                        reason: ExhaustionReason::Internal { message },
                    }
                }
            };

            completed += 1;
            if result.is_solved() {
                solved += 1;
            }
            debug!(idx, completed, solved, "BatchOrchestrator::run: problem finished");
            if let Some(bus) = self.engine.events() {
                bus.emit(OrEvent::BatchProgress {
                    completed,
                    total,
                    solved,
                });
            }
            results[idx] = Some(result);
        }

        let entries: Vec<BatchEntry> = problems
            .into_iter()
            .zip(results)
            .map(|(problem, result)| {
                let result = result.unwrap_or_else(|| SolveResult::Exhausted {
                    attempts: vec![],
                    reason: ExhaustionReason::Internal {
                        message: "no result recorded".to_string(),
                    },
                });
                let correct = evaluate(&problem, &result, self.tolerance);
                BatchEntry {
                    problem,
                    result,
                    correct,
                }
            })
            .collect();

        let run = BatchRun::finalize(entries);
        let stats = run.stats();
        info!(
            "Batch finished: {}/{} solved, {} attempts",
            stats.solved, stats.total, stats.total_attempts
        );
        run
    }
}
