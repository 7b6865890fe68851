//! In-memory test doubles for the LLM and the sandbox
//!
//! Used by unit tests, integration tests and anyone embedding the repair loop
//! who wants deterministic behavior without network or interpreter.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::ExecutionOutcome;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use crate::sandbox::{Sandbox, SandboxError};

type ReplyFn = dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync;
type OutcomeFn = dyn Fn(&str) -> Result<ExecutionOutcome, SandboxError> + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wrap a program the way models usually return it
pub fn fenced(program: &str) -> String {
    format!("Here is the program:\n\n```python\n{}\n```\n", program.trim_end())
}

enum Replies {
    Queue(Mutex<VecDeque<Result<String, LlmError>>>),
    Func(Box<ReplyFn>),
}

/// LLM client that replays scripted replies and records every request
pub struct ScriptedLlmClient {
    replies: Replies,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedLlmClient {
    /// Reply with each entry in order; fails permanently once the script runs out
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Replies::Queue(Mutex::new(replies.into())),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Compute each reply from the request
    pub fn from_fn(f: impl Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            replies: Replies::Func(Box::new(f)),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// User message text of every request received so far
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|r| r.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n"))
            .collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let reply = match &self.replies {
            Replies::Queue(queue) => lock(queue)
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("No more scripted responses".to_string()))),
            Replies::Func(f) => f(&request),
        };
        lock(&self.requests).push(request);
        reply.map(CompletionResponse::text)
    }
}

enum Outcomes {
    Queue(Mutex<VecDeque<Result<ExecutionOutcome, SandboxError>>>),
    Func(Box<OutcomeFn>),
}

/// Sandbox that returns scripted outcomes and records every program
pub struct ScriptedSandbox {
    outcomes: Outcomes,
    programs: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSandbox {
    /// Return each outcome in order; `no_result_produced` once the script runs out
    pub fn new(outcomes: Vec<Result<ExecutionOutcome, SandboxError>>) -> Self {
        Self::with_outcomes(Outcomes::Queue(Mutex::new(outcomes.into())))
    }

    /// Compute each outcome from the program text
    pub fn from_fn(f: impl Fn(&str) -> Result<ExecutionOutcome, SandboxError> + Send + Sync + 'static) -> Self {
        Self::with_outcomes(Outcomes::Func(Box::new(f)))
    }

    fn with_outcomes(outcomes: Outcomes) -> Self {
        Self {
            outcomes,
            programs: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every run
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every program received so far
    pub fn programs(&self) -> Vec<String> {
        lock(&self.programs).clone()
    }

    /// Highest number of runs that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, program: &str, _timeout: Duration) -> Result<ExecutionOutcome, SandboxError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        lock(&self.programs).push(program.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = match &self.outcomes {
            Outcomes::Queue(queue) => lock(queue)
                .pop_front()
                .unwrap_or(Ok(ExecutionOutcome::NoResultProduced)),
            Outcomes::Func(f) => f(program),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn is_available(&self) -> bool {
        true
    }
}
