//! oragent - Operations-Research Solver Agent
//!
//! oragent turns a natural-language optimization problem into a solver program,
//! runs it in a sandbox, and feeds failures back to the model until the program
//! produces an answer or the attempt budget runs out.
//!
//! # Core Concepts
//!
//! - **Bounded Repair**: Every loop ends in `Solved` or `Exhausted`, never hangs
//! - **Isolated Execution**: Generated programs run in a throwaway directory with a hard timeout
//! - **Shared Engine**: One engine serves many concurrent loops, each with private state
//! - **Ordered Batches**: Results come back in input order regardless of completion order
//!
//! # Modules
//!
//! - [`llm`] - Completion gateway over OpenAI, Anthropic and local backends
//! - [`sandbox`] - Program execution and outcome classification
//! - [`repair`] - The generate-execute-repair state machine
//! - [`batch`] - Bounded-concurrency batch runs and evaluation
//! - [`server`] - HTTP and JSON-RPC tool service
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod fakes;
pub mod llm;
pub mod prompts;
pub mod repair;
pub mod sandbox;
pub mod server;

// Re-export commonly used types
pub use config::{Config, GenerationMode, LlmConfig};
pub use domain::{
    Answer, Attempt, BatchEntry, BatchRun, BatchStats, ExecutionOutcome, ExhaustionReason, OutcomeKind, ProblemSpec,
    SolveResult, SolveSummary,
};
pub use events::{EventBus, OrEvent};
pub use llm::{CompletionGateway, CompletionRequest, LlmClient, LlmError};
pub use repair::{RepairEngine, RepairOptions};
pub use sandbox::{PythonSandbox, Sandbox, SandboxError};
