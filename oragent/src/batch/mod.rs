//! Batch orchestration: many problems, bounded concurrency, ordered results

mod evaluate;
mod input;
mod report;
mod runner;

pub use evaluate::{DEFAULT_TOLERANCE, answers_match, evaluate};
pub use input::{BatchInputError, load_problems, parse_problems};
pub use report::{AggregateRecord, write_report};
pub use runner::BatchOrchestrator;
