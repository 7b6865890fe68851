//! Sandboxed executor for generated programs
//!
//! Each run gets a private temporary directory and its own process group, a
//! cleared environment, closed stdin and a wall-clock timeout. The result is
//! always classified into exactly one `ExecutionOutcome`; a `SandboxError` means
//! no sandbox could be set up at all.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ExecutionOutcome;

mod capability;
mod python;
pub mod recognize;

pub use capability::SolverCapability;
pub use python::PythonSandbox;

/// Failure to provide an execution environment
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("failed to write program file: {0}")]
    WriteProgram(#[source] std::io::Error),

    #[error("failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for program: {0}")]
    Wait(#[source] std::io::Error),
}

/// Something that can run a program text and classify what happened
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `program` with a wall-clock `timeout`
    ///
    /// All processes and files belonging to the run are gone when this returns.
    async fn run(&self, program: &str, timeout: Duration) -> Result<ExecutionOutcome, SandboxError>;

    /// Whether the interpreter can be started at all
    async fn is_available(&self) -> bool;
}
