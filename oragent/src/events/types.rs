//! Event types for oragent progress streaming
//!
//! These events represent all observable activity of the solver:
//! - Problem lifecycle (started, finished)
//! - Attempts (started, finished with an outcome kind)
//! - Provider retries
//! - Batch progress

use serde::{Deserialize, Serialize};

use crate::domain::OutcomeKind;

/// Core event enum - the vocabulary of solver activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrEvent {
    // === Problem Lifecycle ===
    /// A repair loop has started for a problem
    ProblemStarted { problem_id: String, max_attempts: u32 },
    /// A repair loop reached Solved or Exhausted
    ProblemFinished {
        problem_id: String,
        solved: bool,
        attempts_used: u32,
    },

    // === Attempts ===
    /// A mathematical model is being requested (formulate mode)
    FormulationStarted { problem_id: String },
    /// An attempt (generate + execute) has started
    AttemptStarted { problem_id: String, attempt: u32 },
    /// An attempt has been classified
    AttemptFinished {
        problem_id: String,
        attempt: u32,
        outcome: OutcomeKind,
        duration_ms: u64,
    },

    // === Provider ===
    /// A transient provider error is being retried
    ProviderRetry {
        problem_id: String,
        retry: u32,
        backoff_ms: u64,
        error: String,
    },

    // === Batch ===
    /// One more problem in a batch has finished
    BatchProgress {
        completed: usize,
        total: usize,
        solved: usize,
    },
}

impl OrEvent {
    /// Problem this event belongs to, if any
    pub fn problem_id(&self) -> Option<&str> {
        match self {
            OrEvent::ProblemStarted { problem_id, .. }
            | OrEvent::ProblemFinished { problem_id, .. }
            | OrEvent::FormulationStarted { problem_id }
            | OrEvent::AttemptStarted { problem_id, .. }
            | OrEvent::AttemptFinished { problem_id, .. }
            | OrEvent::ProviderRetry { problem_id, .. } => Some(problem_id),
            OrEvent::BatchProgress { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrEvent::ProblemStarted { .. } => "ProblemStarted",
            OrEvent::ProblemFinished { .. } => "ProblemFinished",
            OrEvent::FormulationStarted { .. } => "FormulationStarted",
            OrEvent::AttemptStarted { .. } => "AttemptStarted",
            OrEvent::AttemptFinished { .. } => "AttemptFinished",
            OrEvent::ProviderRetry { .. } => "ProviderRetry",
            OrEvent::BatchProgress { .. } => "BatchProgress",
        }
    }
}
