//! Attempt and ExecutionOutcome - what happened when one program ran

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The answer a successful program produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    /// Optimal objective value
    Optimal { value: f64 },
    /// Solver proved the model infeasible
    Infeasible,
    /// Solver proved the model unbounded
    Unbounded,
}

impl Answer {
    /// Status label: optimal, infeasible or unbounded
    pub fn status(&self) -> &'static str {
        match self {
            Answer::Optimal { .. } => "optimal",
            Answer::Infeasible => "infeasible",
            Answer::Unbounded => "unbounded",
        }
    }

    /// Numeric value, only for optimal answers
    pub fn value(&self) -> Option<f64> {
        match self {
            Answer::Optimal { value } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Optimal { value } => write!(f, "{}", value),
            Answer::Infeasible => write!(f, "INFEASIBLE"),
            Answer::Unbounded => write!(f, "UNBOUNDED"),
        }
    }
}

/// Classification of one program execution. Exactly one per Attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { answer: Answer, raw_output: String },
    CompileError { message: String },
    RuntimeError { message: String, stack: String },
    Timeout { elapsed_ms: u64 },
    NoResultProduced,
}

/// Tag-only view of an ExecutionOutcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    NoResultProduced,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::CompileError => "compile_error",
            OutcomeKind::RuntimeError => "runtime_error",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::NoResultProduced => "no_result_produced",
        };
        write!(f, "{}", s)
    }
}

impl ExecutionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ExecutionOutcome::Success { .. } => OutcomeKind::Success,
            ExecutionOutcome::CompileError { .. } => OutcomeKind::CompileError,
            ExecutionOutcome::RuntimeError { .. } => OutcomeKind::RuntimeError,
            ExecutionOutcome::Timeout { .. } => OutcomeKind::Timeout,
            ExecutionOutcome::NoResultProduced => OutcomeKind::NoResultProduced,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// The answer, if this outcome is a success
    pub fn answer(&self) -> Option<Answer> {
        match self {
            ExecutionOutcome::Success { answer, .. } => Some(*answer),
            _ => None,
        }
    }

    /// Sanity check applied before a success is accepted
    ///
    /// An optimal value that is NaN or infinite is not an answer.
    pub fn sanitized(self) -> Self {
        match self {
            ExecutionOutcome::Success {
                answer: Answer::Optimal { value },
                ..
            } if !value.is_finite() => {
                debug!(%value, "sanitized: non-finite value demoted to no_result_produced");
                ExecutionOutcome::NoResultProduced
            }
            other => other,
        }
    }

    /// One-line, user-safe description of a failed outcome
    ///
    /// Never includes stack traces; used for service error payloads.
    pub fn failure_summary(&self) -> String {
        match self {
            ExecutionOutcome::Success { answer, .. } => format!("succeeded with {}", answer),
            ExecutionOutcome::CompileError { message } => format!("compile error: {}", first_line(message)),
            ExecutionOutcome::RuntimeError { message, .. } => format!("runtime error: {}", first_line(message)),
            ExecutionOutcome::Timeout { elapsed_ms } => format!("timed out after {}ms", elapsed_ms),
            ExecutionOutcome::NoResultProduced => "program produced no usable answer".to_string(),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).map(str::trim).unwrap_or("")
}

/// One (program, outcome) pair. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Position in the loop, contiguous from 0
    pub index: u32,

    /// Program text that was executed (empty if the model request failed)
    pub program: String,

    pub outcome: ExecutionOutcome,

    pub started_at: DateTime<Utc>,

    /// Wall time spent generating and executing
    pub duration_ms: u64,
}
