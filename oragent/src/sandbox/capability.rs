//! Solver capability injected into the sandbox

use std::collections::BTreeMap;
use std::fmt;

use crate::config::SandboxConfig;

/// What a generated program can count on: an interpreter, a solver library,
/// and whatever environment the solver needs (license file paths etc.)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCapability {
    pub interpreter: String,
    pub library: String,
    pub env: BTreeMap<String, String>,
}

impl SolverCapability {
    pub fn new(interpreter: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            library: library.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            library: config.solver_library.clone(),
            env: config.env.clone(),
        }
    }
}

impl fmt::Display for SolverCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.library, self.interpreter)
    }
}
