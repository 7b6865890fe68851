//! Domain types for oragent
//!
//! Core data model: ProblemSpec, Attempt, ExecutionOutcome, SolveResult, BatchRun.
//! Everything here is plain data; behavior lives in `repair`, `sandbox` and `batch`.

mod attempt;
mod problem;
mod result;

pub use attempt::{Answer, Attempt, ExecutionOutcome, OutcomeKind};
pub use problem::{ExpectedAnswer, ProblemHints, ProblemSpec};
pub use result::{BatchEntry, BatchRun, BatchStats, ExhaustionReason, SolveResult, SolveSummary, SummaryStatus};
