//! SolveResult and BatchRun - terminal outcomes of the repair loop

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::{Answer, Attempt, ProblemSpec};

/// Why a loop ended without a solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Every attempt in the budget was used
    BudgetSpent,
    /// The model provider failed permanently
    ProviderFailed { message: String },
    /// No sandbox could be created to run programs
    SandboxUnavailable { message: String },
    /// The loop task itself died
    Internal { message: String },
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionReason::BudgetSpent => write!(f, "attempt budget spent"),
            ExhaustionReason::ProviderFailed { message } => write!(f, "model provider failed: {}", message),
            ExhaustionReason::SandboxUnavailable { message } => write!(f, "sandbox unavailable: {}", message),
            ExhaustionReason::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

/// Terminal result of one repair loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SolveResult {
    Solved {
        attempt_index: u32,
        answer: Answer,
        program: String,
        attempts: Vec<Attempt>,
    },
    Exhausted {
        attempts: Vec<Attempt>,
        reason: ExhaustionReason,
    },
}

impl SolveResult {
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            SolveResult::Solved { attempts, .. } => attempts,
            SolveResult::Exhausted { attempts, .. } => attempts,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, SolveResult::Solved { .. })
    }

    pub fn answer(&self) -> Option<Answer> {
        match self {
            SolveResult::Solved { answer, .. } => Some(*answer),
            SolveResult::Exhausted { .. } => None,
        }
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts().len() as u32
    }

    /// User-visible error for an exhausted loop
    ///
    /// Carries only the last attempt's classification (or the abort reason),
    /// never the attempt history or raw stack traces.
    pub fn error_message(&self) -> Option<String> {
        match self {
            SolveResult::Solved { .. } => None,
            SolveResult::Exhausted {
                reason: ExhaustionReason::BudgetSpent,
                attempts,
            } => Some(match attempts.last() {
                Some(last) => format!(
                    "failed after {} attempt(s); last attempt: {}",
                    attempts.len(),
                    last.outcome.failure_summary()
                ),
                None => "no attempts were allowed".to_string(),
            }),
            SolveResult::Exhausted { reason, .. } => Some(reason.to_string()),
        }
    }

    /// Flatten into the caller-facing summary shape
    pub fn summary(&self) -> SolveSummary {
        debug!(solved = %self.is_solved(), "SolveResult::summary: called");
        match self {
            SolveResult::Solved { answer, program, .. } => SolveSummary {
                id: None,
                status: SummaryStatus::Solved,
                result: answer.value(),
                solution_status: Some(answer.status().to_string()),
                program: Some(program.clone()),
                attempts_used: self.attempts_used(),
                error: None,
                correct: None,
            },
            SolveResult::Exhausted { .. } => SolveSummary {
                id: None,
                status: SummaryStatus::Failed,
                result: None,
                solution_status: None,
                program: None,
                attempts_used: self.attempts_used(),
                error: self.error_message(),
                correct: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Solved,
    Failed,
}

/// Caller-facing result shape shared by the service and batch output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: SummaryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub attempts_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
}

/// One (problem, result) pair in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub problem: ProblemSpec,
    pub result: SolveResult,
    /// Evaluation against ground truth; None when no ground truth was given
    pub correct: Option<bool>,
}

impl BatchEntry {
    pub fn summary(&self) -> SolveSummary {
        let mut summary = self.result.summary();
        summary.id = Some(self.problem.id.clone());
        summary.correct = self.correct;
        summary
    }
}

/// Aggregate counters over a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub solved: usize,
    pub exhausted: usize,
    pub total_attempts: u64,
    pub evaluated: usize,
    pub correct: usize,
}

impl BatchStats {
    /// Fraction of evaluated problems answered correctly
    pub fn accuracy(&self) -> Option<f64> {
        (self.evaluated > 0).then(|| self.correct as f64 / self.evaluated as f64)
    }
}

/// Ordered results of a batch. Immutable once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    entries: Vec<BatchEntry>,
    stats: BatchStats,
}

impl BatchRun {
    /// Compute counters and freeze the run
    pub fn finalize(entries: Vec<BatchEntry>) -> Self {
        debug!(entry_count = %entries.len(), "BatchRun::finalize: called");
        let mut stats = BatchStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            if entry.result.is_solved() {
                stats.solved += 1;
            } else {
                stats.exhausted += 1;
            }
            stats.total_attempts += entry.result.attempts().len() as u64;
            if let Some(correct) = entry.correct {
                stats.evaluated += 1;
                if correct {
                    stats.correct += 1;
                }
            }
        }
        Self { entries, stats }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }
}
