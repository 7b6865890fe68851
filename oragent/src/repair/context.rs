//! RepairContext - what one loop invocation knows about its problem
//!
//! Keeps the full attempt history plus a bounded window of failure notes that
//! gets rendered into repair prompts. Older notes fall off the front.

use std::collections::VecDeque;

use tracing::debug;

use crate::domain::{Attempt, ExecutionOutcome, ProblemSpec};
use crate::prompts::{FailureNote, PromptContext};
use crate::sandbox::recognize::truncate_tail;

/// State owned by exactly one repair loop
#[derive(Debug)]
pub struct RepairContext {
    problem: ProblemSpec,
    formulation: Option<String>,
    attempts: Vec<Attempt>,
    failures: VecDeque<FailureNote>,
    max_entries: usize,
    max_chars: usize,
}

impl RepairContext {
    pub fn new(problem: ProblemSpec, max_entries: usize, max_chars: usize) -> Self {
        debug!(problem_id = %problem.id, max_entries, max_chars, "RepairContext::new: called");
        Self {
            problem,
            formulation: None,
            attempts: Vec::new(),
            failures: VecDeque::new(),
            max_entries,
            max_chars,
        }
    }

    pub fn problem(&self) -> &ProblemSpec {
        &self.problem
    }

    pub fn formulation(&self) -> Option<&str> {
        self.formulation.as_deref()
    }

    pub fn set_formulation(&mut self, formulation: impl Into<String>) {
        self.formulation = Some(formulation.into());
    }

    /// Index the next attempt will get
    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn record(&mut self, attempt: Attempt) {
        debug!(index = attempt.index, kind = %attempt.outcome.kind(), "RepairContext::record: called");
        self.attempts.push(attempt);
    }

    /// Add a failure note for the latest attempt
    ///
    /// `note` replaces the default summary (used when the model request itself failed).
    pub fn note_failure(&mut self, note: Option<&str>) {
        let Some(last) = self.attempts.last() else {
            debug!("RepairContext::note_failure: no attempts yet");
            return;
        };
        let entry = self.describe(last, note);
        self.failures.push_back(entry);
        while self.failures.len() > self.max_entries {
            self.failures.pop_front();
        }
        debug!(notes = self.failures.len(), "RepairContext::note_failure: recorded");
    }

    fn describe(&self, attempt: &Attempt, note: Option<&str>) -> FailureNote {
        let (summary, detail) = match &attempt.outcome {
            ExecutionOutcome::CompileError { message } => (
                "The program failed to compile.".to_string(),
                Some(truncate_tail(message, self.max_chars)),
            ),
            ExecutionOutcome::RuntimeError { message, stack } => {
                let detail = if stack.trim().is_empty() { message } else { stack };
                (
                    format!("The program crashed: {}", message),
                    Some(truncate_tail(detail, self.max_chars)),
                )
            }
            ExecutionOutcome::Timeout { elapsed_ms } => (
                format!(
                    "The program took too long and was stopped after {:.1}s. Make it simpler or faster.",
                    *elapsed_ms as f64 / 1000.0
                ),
                None,
            ),
            ExecutionOutcome::NoResultProduced => (
                "The program ran but produced no usable answer. End the output with a RESULT line."
                    .to_string(),
                None,
            ),
            ExecutionOutcome::Success { answer, .. } => (format!("The program reported {}.", answer), None),
        };
        FailureNote {
            attempt_number: attempt.index + 1,
            kind: attempt.outcome.kind().to_string(),
            summary: note.map(str::to_string).unwrap_or(summary),
            detail,
        }
    }

    /// Failure notes in the window, oldest first
    pub fn failures(&self) -> Vec<FailureNote> {
        self.failures.iter().cloned().collect()
    }

    /// Most recent program that actually reached the sandbox
    pub fn last_program(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .map(|a| a.program.as_str())
            .find(|p| !p.trim().is_empty())
    }

    /// Template variables for the next prompt
    pub fn prompt_context(&self, solver_library: &str, timeout_secs: u64, max_attempts: u32) -> PromptContext {
        PromptContext {
            statement: self.problem.statement.clone(),
            variables: self.problem.hints.variables.clone(),
            constraints: self.problem.hints.constraints.clone(),
            solver_library: solver_library.to_string(),
            timeout_secs,
            formulation: self.formulation.clone(),
            draft: None,
            previous_program: self.last_program().map(str::to_string),
            failures: self.failures(),
            attempt_number: self.next_index() + 1,
            max_attempts,
        }
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        self.attempts
    }
}
