//! RepairEngine - the generate / execute / repair loop for one problem
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! [Formulating] -> Generating -> Executing -> Classifying -+-> Solved
//!                      ^                                   |
//!                      +----------- Repairing <------------+-> Exhausted
//! ```
//!
//! Only generation+execution cycles count against `max_attempts`. Transient
//! provider errors are retried in place with exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{Config, GenerationMode};
use crate::domain::{Answer, Attempt, ExecutionOutcome, ExhaustionReason, ProblemSpec, SolveResult};
use crate::events::{EventBus, EventEmitter};
use crate::llm::{CompletionOptions, CompletionRequest, LlmClient, ProviderErrorKind};
use crate::prompts::{PromptContext, PromptLoader};
use crate::sandbox::Sandbox;

use super::context::RepairContext;
use super::extract::extract_program;

/// Knobs of the repair loop, resolved from configuration
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Retries of one completion request after transient errors
    pub transient_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Failure notes kept for repair prompts
    pub history_entries: usize,
    /// Per-note cap on error text
    pub history_max_chars: usize,
    pub mode: GenerationMode,
    pub review_formulation: bool,
    /// Fixed wall-clock limit for every execution
    pub execution_timeout: Duration,
    pub completion: CompletionOptions,
    /// Named in prompts
    pub solver_library: String,
}

impl RepairOptions {
    pub fn from_config(config: &Config) -> Self {
        debug!("RepairOptions::from_config: called");
        Self {
            transient_retries: config.repair.transient_retries,
            initial_backoff: Duration::from_millis(config.repair.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.repair.max_backoff_ms),
            history_entries: config.repair.history_entries,
            history_max_chars: config.repair.history_max_chars,
            mode: config.repair.mode,
            review_formulation: config.repair.review_formulation,
            execution_timeout: config.sandbox.execution_timeout(),
            completion: config.llm.completion_options(),
            solver_library: config.sandbox.solver_library.clone(),
        }
    }

    /// Backoff before retry number `retry` (1-based)
    ///
    /// Doubles from `initial_backoff`, capped at `max_backoff`, plus up to 25%
    /// jitter. A provider-supplied retry-after raises the floor.
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exp = 2u32.saturating_pow(retry.saturating_sub(1));
        let base = self.initial_backoff.saturating_mul(exp).min(self.max_backoff);
        let base = retry_after.map_or(base, |ra| ra.max(base)).min(self.max_backoff);
        let jitter_cap = (base.as_millis() / 4) as u64;
        let jitter = if jitter_cap > 0 {
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// States of one loop invocation
#[derive(Debug)]
enum LoopState {
    Formulating,
    Generating,
    Executing {
        index: u32,
        program: String,
        started_at: DateTime<Utc>,
        started: Instant,
    },
    Classifying {
        index: u32,
        program: String,
        outcome: ExecutionOutcome,
        note: Option<String>,
        started_at: DateTime<Utc>,
        started: Instant,
    },
    Repairing {
        note: Option<String>,
    },
    Solved {
        attempt_index: u32,
        answer: Answer,
        program: String,
    },
    Exhausted(ExhaustionReason),
}

/// Why a completion produced no text
#[derive(Debug)]
enum CompletionFailure {
    /// Retrying cannot help
    Permanent(String),
    /// Still failing after all transient retries
    RetriesSpent(String),
}

/// Drives repair loops; cheap to share across tasks
pub struct RepairEngine {
    llm: Arc<dyn LlmClient>,
    sandbox: Arc<dyn Sandbox>,
    prompts: Arc<PromptLoader>,
    options: RepairOptions,
    events: Option<Arc<EventBus>>,
}

impl RepairEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sandbox: Arc<dyn Sandbox>,
        prompts: Arc<PromptLoader>,
        options: RepairOptions,
    ) -> Self {
        debug!(mode = ?options.mode, timeout = ?options.execution_timeout, "RepairEngine::new: called");
        Self {
            llm,
            sandbox,
            prompts,
            options,
            events: None,
        }
    }

    /// Publish progress on `bus`
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn options(&self) -> &RepairOptions {
        &self.options
    }

    pub fn events(&self) -> Option<&Arc<EventBus>> {
        self.events.as_ref()
    }

    fn emitter(&self, problem_id: &str) -> EventEmitter {
        match &self.events {
            Some(bus) => bus.emitter_for(problem_id),
            None => EventEmitter::detached(problem_id),
        }
    }

    /// Run the loop for one problem until it is solved or the budget is spent
    ///
    /// Never panics on provider or program failures; every way out is a `SolveResult`.
    pub async fn solve(&self, problem: &ProblemSpec, max_attempts: u32, model_id: &str) -> SolveResult {
        debug!(problem_id = %problem.id, max_attempts, %model_id, "solve: called");
        info!("Solving problem {} (model: {}, max_attempts: {})", problem.id, model_id, max_attempts);

        let emitter = self.emitter(&problem.id);
        emitter.problem_started(max_attempts);

        let mut ctx = RepairContext::new(
            problem.clone(),
            self.options.history_entries,
            self.options.history_max_chars,
        );

        let system = self.render_system();
        let mut state = match (&system, max_attempts, self.options.mode) {
            (Err(message), _, _) => LoopState::Exhausted(ExhaustionReason::Internal {
                message: message.clone(),
            }),
            (Ok(_), 0, _) => {
                debug!(problem_id = %problem.id, "solve: zero attempt budget");
                LoopState::Exhausted(ExhaustionReason::BudgetSpent)
            }
            (Ok(_), _, GenerationMode::Formulate) => LoopState::Formulating,
            (Ok(_), _, GenerationMode::Direct) => LoopState::Generating,
        };
        let system = system.unwrap_or_default();

        let result = loop {
            state = match state {
                LoopState::Formulating => {
                    debug!(problem_id = %problem.id, "solve: Formulating");
                    emitter.formulation_started();
                    match self.formulate(&ctx, &system, model_id, &emitter).await {
                        Ok(Some(formulation)) => {
                            ctx.set_formulation(formulation);
                            LoopState::Generating
                        }
                        Ok(None) => LoopState::Generating,
                        Err(reason) => LoopState::Exhausted(reason),
                    }
                }
                LoopState::Generating => {
                    let index = ctx.next_index();
                    debug!(problem_id = %problem.id, index, "solve: Generating");
                    emitter.attempt_started(index);
                    let started_at = Utc::now();
                    let started = Instant::now();

                    match self.attempt_prompt(&ctx, max_attempts) {
                        Err(message) => LoopState::Exhausted(ExhaustionReason::Internal { message }),
                        Ok(prompt) => {
                            let request =
                                CompletionRequest::single(model_id, &system, prompt, self.options.completion.clone());
                            match self.complete_with_retry(request, &emitter).await {
                                Ok(reply) => LoopState::Executing {
                                    index,
                                    program: extract_program(&reply),
                                    started_at,
                                    started,
                                },
                                Err(CompletionFailure::Permanent(message)) => {
                                    warn!("Problem {}: model request failed permanently: {}", problem.id, message);
                                    LoopState::Exhausted(ExhaustionReason::ProviderFailed { message })
                                }
                                Err(CompletionFailure::RetriesSpent(message)) => {
                                    warn!("Problem {}: attempt {} lost to provider errors: {}", problem.id, index, message);
                                    LoopState::Classifying {
                                        index,
                                        program: String::new(),
                                        outcome: ExecutionOutcome::NoResultProduced,
                                        note: Some(format!("The model request failed ({}); no program was produced.", message)),
                                        started_at,
                                        started,
                                    }
                                }
                            }
                        }
                    }
                }
                LoopState::Executing {
                    index,
                    program,
                    started_at,
                    started,
                } => {
                    debug!(problem_id = %problem.id, index, program_len = program.len(), "solve: Executing");
                    match self.sandbox.run(&program, self.options.execution_timeout).await {
                        Ok(outcome) => LoopState::Classifying {
                            index,
                            program,
                            outcome: outcome.sanitized(),
                            note: None,
                            started_at,
                            started,
                        },
                        Err(e) => {
                            warn!("Problem {}: sandbox unavailable: {}", problem.id, e);
                            LoopState::Exhausted(ExhaustionReason::SandboxUnavailable { message: e.to_string() })
                        }
                    }
                }
                LoopState::Classifying {
                    index,
                    program,
                    outcome,
                    note,
                    started_at,
                    started,
                } => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let kind = outcome.kind();
                    debug!(problem_id = %problem.id, index, %kind, duration_ms, "solve: Classifying");
                    emitter.attempt_finished(index, kind, duration_ms);

                    let answer = outcome.answer();
                    ctx.record(Attempt {
                        index,
                        program: program.clone(),
                        outcome,
                        started_at,
                        duration_ms,
                    });

                    match answer {
                        Some(answer) => LoopState::Solved {
                            attempt_index: index,
                            answer,
                            program,
                        },
                        None if ctx.next_index() < max_attempts => LoopState::Repairing { note },
                        None => LoopState::Exhausted(ExhaustionReason::BudgetSpent),
                    }
                }
                LoopState::Repairing { note } => {
                    debug!(problem_id = %problem.id, "solve: Repairing");
                    ctx.note_failure(note.as_deref());
                    info!(
                        "Problem {}: attempt {}/{} failed, repairing",
                        problem.id,
                        ctx.next_index(),
                        max_attempts
                    );
                    LoopState::Generating
                }
                LoopState::Solved {
                    attempt_index,
                    answer,
                    program,
                } => {
                    info!("Problem {} solved at attempt {}: {}", problem.id, attempt_index, answer);
                    break SolveResult::Solved {
                        attempt_index,
                        answer,
                        program,
                        attempts: ctx.into_attempts(),
                    };
                }
                LoopState::Exhausted(reason) => {
                    info!("Problem {} exhausted: {}", problem.id, reason);
                    break SolveResult::Exhausted {
                        attempts: ctx.into_attempts(),
                        reason,
                    };
                }
            };
        };

        emitter.problem_finished(result.is_solved(), result.attempts_used());
        result
    }

    fn base_context(&self) -> PromptContext {
        PromptContext {
            solver_library: self.options.solver_library.clone(),
            timeout_secs: self.options.execution_timeout.as_secs().max(1),
            ..Default::default()
        }
    }

    fn render_system(&self) -> Result<String, String> {
        self.prompts
            .render("system", &self.base_context())
            .map_err(|e| format!("failed to render system prompt: {}", e))
    }

    /// Repair prompt once there is a failed program to show, generation prompt otherwise
    fn attempt_prompt(&self, ctx: &RepairContext, max_attempts: u32) -> Result<String, String> {
        let base = self.base_context();
        let pc = ctx.prompt_context(&base.solver_library, base.timeout_secs, max_attempts);
        let template = if pc.previous_program.is_some() && !pc.failures.is_empty() {
            "repair"
        } else {
            "generate"
        };
        debug!(%template, attempt_number = pc.attempt_number, "attempt_prompt: called");
        self.prompts
            .render(template, &pc)
            .map_err(|e| format!("failed to render {} prompt: {}", template, e))
    }

    /// Produce a mathematical model, optionally reviewed
    ///
    /// `Ok(None)` when transient errors outlast the retries: the loop then
    /// generates code straight from the statement.
    async fn formulate(
        &self,
        ctx: &RepairContext,
        system: &str,
        model_id: &str,
        emitter: &EventEmitter,
    ) -> Result<Option<String>, ExhaustionReason> {
        debug!(problem_id = %ctx.problem().id, review = self.options.review_formulation, "formulate: called");
        let mut pc = self.base_context();
        pc.statement = ctx.problem().statement.clone();
        pc.variables = ctx.problem().hints.variables.clone();
        pc.constraints = ctx.problem().hints.constraints.clone();

        let prompt = self
            .prompts
            .render("formulate", &pc)
            .map_err(|e| ExhaustionReason::Internal { message: e.to_string() })?;
        let request = CompletionRequest::single(model_id, system, prompt, self.options.completion.clone());
        let draft = match self.complete_with_retry(request, emitter).await {
            Ok(draft) => draft,
            Err(CompletionFailure::Permanent(message)) => return Err(ExhaustionReason::ProviderFailed { message }),
            Err(CompletionFailure::RetriesSpent(message)) => {
                warn!("Formulation skipped after provider errors: {}", message);
                return Ok(None);
            }
        };

        if !self.options.review_formulation {
            return Ok(Some(draft));
        }

        pc.draft = Some(draft.clone());
        let prompt = self
            .prompts
            .render("review", &pc)
            .map_err(|e| ExhaustionReason::Internal { message: e.to_string() })?;
        let request = CompletionRequest::single(model_id, system, prompt, self.options.completion.clone());
        match self.complete_with_retry(request, emitter).await {
            Ok(reviewed) if !reviewed.trim().is_empty() => Ok(Some(reviewed)),
            Ok(_) => Ok(Some(draft)),
            Err(CompletionFailure::Permanent(message)) => Err(ExhaustionReason::ProviderFailed { message }),
            Err(CompletionFailure::RetriesSpent(message)) => {
                warn!("Formulation review skipped after provider errors: {}", message);
                Ok(Some(draft))
            }
        }
    }

    /// One completion, retrying transient errors in place
    async fn complete_with_retry(
        &self,
        request: CompletionRequest,
        emitter: &EventEmitter,
    ) -> Result<String, CompletionFailure> {
        let mut retry = 0u32;
        loop {
            debug!(model = %request.model, retry, "complete_with_retry: calling LLM");
            match self.llm.complete(request.clone()).await {
                Ok(response) => {
                    debug!(stop_reason = ?response.stop_reason, len = response.content.len(), "complete_with_retry: response received");
                    return Ok(response.content);
                }
                Err(e) if e.kind() == ProviderErrorKind::Permanent => {
                    debug!(error = %e, "complete_with_retry: permanent error");
                    return Err(CompletionFailure::Permanent(e.describe()));
                }
                Err(e) => {
                    if retry >= self.options.transient_retries {
                        debug!(error = %e, retry, "complete_with_retry: retries spent");
                        return Err(CompletionFailure::RetriesSpent(e.describe()));
                    }
                    retry += 1;
                    let backoff = self.options.backoff(retry, e.retry_after());
                    warn!("Transient provider error ({}), retry {} in {:?}", e, retry, backoff);
                    emitter.provider_retry(retry, backoff.as_millis() as u64, &e.to_string());
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutcomeKind;
    use crate::events::OrEvent;
    use crate::fakes::{ScriptedLlmClient, ScriptedSandbox, fenced};
    use crate::llm::LlmError;
    use crate::sandbox::SandboxError;

    fn options() -> RepairOptions {
        RepairOptions {
            transient_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..RepairOptions::default()
        }
    }

    fn engine(llm: Arc<ScriptedLlmClient>, sandbox: Arc<ScriptedSandbox>, options: RepairOptions) -> RepairEngine {
        RepairEngine::new(llm, sandbox, Arc::new(PromptLoader::embedded_only()), options)
    }

    fn success(value: f64) -> Result<ExecutionOutcome, SandboxError> {
        Ok(ExecutionOutcome::Success {
            answer: Answer::Optimal { value },
            raw_output: format!("RESULT: {}", value),
        })
    }

    fn unavailable() -> LlmError {
        LlmError::ApiError {
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("print('RESULT: 42')"))]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![success(42.0)]));
        let engine = engine(llm.clone(), sandbox.clone(), options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        match &result {
            SolveResult::Solved {
                attempt_index,
                answer,
                program,
                attempts,
            } => {
                assert_eq!(*attempt_index, 0);
                assert_eq!(*answer, Answer::Optimal { value: 42.0 });
                assert_eq!(program, "print('RESULT: 42')");
                assert_eq!(attempts.len(), 1);
            }
            other => panic!("expected Solved, got {:?}", other),
        }
        assert_eq!(llm.call_count(), 1);
        assert_eq!(sandbox.programs(), vec!["print('RESULT: 42')".to_string()]);
        assert_eq!(llm.requests()[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_compile_error_then_success_uses_repair_prompt() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(fenced("prnt(")),
            Ok(fenced("print('RESULT: 100')")),
        ]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![
            Ok(ExecutionOutcome::CompileError {
                message: "SyntaxError: '(' was never closed".into(),
            }),
            success(100.0),
        ]));
        let engine = engine(llm.clone(), sandbox, options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        assert!(result.is_solved());
        assert_eq!(result.answer(), Some(Answer::Optimal { value: 100.0 }));
        assert_eq!(result.attempts_used(), 2);
        assert_eq!(result.attempts()[0].outcome.kind(), OutcomeKind::CompileError);

        let prompts = llm.prompts();
        assert!(prompts[1].contains("attempt 2 of 3"));
        assert!(prompts[1].contains("prnt("));
        assert!(prompts[1].contains("was never closed"));
    }

    #[tokio::test]
    async fn test_all_failures_exhaust_budget() {
        let llm = Arc::new(ScriptedLlmClient::from_fn(|_| Ok(fenced("print('hello')"))));
        let sandbox = Arc::new(ScriptedSandbox::from_fn(|_| Ok(ExecutionOutcome::NoResultProduced)));
        let engine = engine(llm.clone(), sandbox, options());

        let result = engine.solve(&ProblemSpec::new("max x"), 4, "gpt-4o").await;
        match &result {
            SolveResult::Exhausted { attempts, reason } => {
                assert_eq!(attempts.len(), 4);
                assert_eq!(*reason, ExhaustionReason::BudgetSpent);
                let indices: Vec<u32> = attempts.iter().map(|a| a.index).collect();
                assert_eq!(indices, vec![0, 1, 2, 3]);
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(llm.call_count(), 4);
        assert!(result.error_message().unwrap().contains("no usable answer"));
    }

    #[tokio::test]
    async fn test_zero_budget_makes_no_calls() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
        let engine = engine(llm.clone(), sandbox.clone(), options());

        let result = engine.solve(&ProblemSpec::new("max x"), 0, "gpt-4o").await;
        assert_eq!(
            result,
            SolveResult::Exhausted {
                attempts: vec![],
                reason: ExhaustionReason::BudgetSpent
            }
        );
        assert_eq!(llm.call_count(), 0);
        assert!(sandbox.programs().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_provider_error_aborts() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        })]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
        let engine = engine(llm.clone(), sandbox.clone(), options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        match result {
            SolveResult::Exhausted {
                attempts,
                reason: ExhaustionReason::ProviderFailed { message },
            } => {
                assert!(attempts.is_empty());
                assert!(message.contains("API key"));
            }
            other => panic!("expected ProviderFailed, got {:?}", other),
        }
        assert_eq!(llm.call_count(), 1);
        assert!(sandbox.programs().is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_without_spending_budget() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(fenced("print('RESULT: 7')")),
        ]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![success(7.0)]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut rx = bus.subscribe();
        let engine = engine(llm.clone(), sandbox, options()).with_events(bus);

        let result = engine.solve(&ProblemSpec::new("max x").with_id("p1"), 1, "gpt-4o").await;
        assert!(result.is_solved());
        assert_eq!(result.attempts_used(), 1);
        assert_eq!(llm.call_count(), 3);

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if let OrEvent::ProviderRetry { problem_id, .. } = event {
                assert_eq!(problem_id, "p1");
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_persistent_transient_error_consumes_attempt() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(fenced("print('RESULT: 5')")),
        ]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![success(5.0)]));
        let engine = engine(llm.clone(), sandbox.clone(), options());

        let result = engine.solve(&ProblemSpec::new("max x"), 2, "gpt-4o").await;
        assert!(result.is_solved());
        let attempts = result.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].program, "");
        assert_eq!(attempts[0].outcome, ExecutionOutcome::NoResultProduced);
        assert_eq!(sandbox.programs().len(), 1);
        // no program to repair yet, so the second request is a fresh generation prompt
        let prompts = llm.prompts();
        assert!(prompts[3].contains("Write a complete, reliable Python program"));
    }

    #[tokio::test]
    async fn test_sandbox_unavailable_aborts() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("print(1)"))]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![Err(SandboxError::CreateDir(std::io::Error::other(
            "disk full",
        )))]));
        let engine = engine(llm, sandbox, options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        match result {
            SolveResult::Exhausted {
                reason: ExhaustionReason::SandboxUnavailable { message },
                ..
            } => assert!(message.contains("disk full")),
            other => panic!("expected SandboxUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_finite_answer_is_not_accepted() {
        let llm = Arc::new(ScriptedLlmClient::from_fn(|_| Ok(fenced("print('RESULT: nan')"))));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![success(f64::NAN), success(3.0)]));
        let engine = engine(llm, sandbox, options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        assert_eq!(result.answer(), Some(Answer::Optimal { value: 3.0 }));
        assert_eq!(result.attempts()[0].outcome, ExecutionOutcome::NoResultProduced);
    }

    #[tokio::test]
    async fn test_infeasible_is_solved() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("print('RESULT: INFEASIBLE')"))]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![Ok(ExecutionOutcome::Success {
            answer: Answer::Infeasible,
            raw_output: "RESULT: INFEASIBLE".into(),
        })]));
        let engine = engine(llm, sandbox, options());

        let result = engine.solve(&ProblemSpec::new("max x"), 3, "gpt-4o").await;
        assert_eq!(result.answer(), Some(Answer::Infeasible));
    }

    #[tokio::test]
    async fn test_formulate_mode_embeds_reviewed_model() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok("draft: max 3x + 5y".into()),
            Ok("reviewed: max 3x + 5y s.t. x + 2y <= 14".into()),
            Ok(fenced("print('RESULT: 35')")),
        ]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![success(35.0)]));
        let mut opts = options();
        opts.mode = GenerationMode::Formulate;
        let engine = engine(llm.clone(), sandbox, opts);

        let result = engine.solve(&ProblemSpec::new("chairs and tables"), 2, "gpt-4o").await;
        assert!(result.is_solved());
        assert_eq!(result.attempts_used(), 1);
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("draft: max 3x + 5y"));
        assert!(prompts[2].contains("reviewed: max 3x + 5y s.t. x + 2y <= 14"));
    }

    #[tokio::test]
    async fn test_formulate_permanent_failure_aborts() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::ApiError {
            status: 404,
            message: "no such model".into(),
        })]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
        let mut opts = options();
        opts.mode = GenerationMode::Formulate;
        let engine = engine(llm, sandbox, opts);

        let result = engine.solve(&ProblemSpec::new("max x"), 2, "gpt-4o").await;
        assert!(matches!(
            result,
            SolveResult::Exhausted {
                reason: ExhaustionReason::ProviderFailed { .. },
                ..
            }
        ));
        assert_eq!(result.attempts_used(), 0);
    }

    #[tokio::test]
    async fn test_events_cover_the_attempt_lifecycle() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("x")), Ok(fenced("y"))]));
        let sandbox = Arc::new(ScriptedSandbox::new(vec![
            Ok(ExecutionOutcome::Timeout { elapsed_ms: 1000 }),
            success(1.0),
        ]));
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut rx = bus.subscribe();
        let engine = engine(llm, sandbox, options()).with_events(bus);

        engine.solve(&ProblemSpec::new("max x").with_id("ev"), 3, "gpt-4o").await;

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec![
                "ProblemStarted",
                "AttemptStarted",
                "AttemptFinished",
                "AttemptStarted",
                "AttemptFinished",
                "ProblemFinished"
            ]
        );
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let opts = RepairOptions {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            ..RepairOptions::default()
        };
        let first = opts.backoff(1, None);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = opts.backoff(3, None);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        let tenth = opts.backoff(10, None);
        assert!(tenth >= Duration::from_millis(1000) && tenth <= Duration::from_millis(1250));
        let floored = opts.backoff(1, Some(Duration::from_millis(700)));
        assert!(floored >= Duration::from_millis(700));
    }
}
