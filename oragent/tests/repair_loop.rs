//! End-to-end tests for the repair loop
//!
//! Most tests run against the in-memory fakes; the ones marked "real sandbox"
//! execute actual programs and skip when python3 is missing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use oragent::domain::{Answer, ExecutionOutcome, ExhaustionReason, OutcomeKind, ProblemSpec, SolveResult};
use oragent::fakes::{ScriptedLlmClient, ScriptedSandbox, fenced};
use oragent::llm::LlmError;
use oragent::prompts::PromptLoader;
use oragent::repair::{RepairEngine, RepairOptions};
use oragent::sandbox::{PythonSandbox, Sandbox, SolverCapability};

const LP_PROBLEM: &str = "maximize 3x+4y subject to 2x+y<=40, x+3y<=60, x,y>=0";

fn fast_options() -> RepairOptions {
    RepairOptions {
        transient_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..RepairOptions::default()
    }
}

fn engine_with(llm: Arc<ScriptedLlmClient>, sandbox: Arc<dyn Sandbox>, options: RepairOptions) -> RepairEngine {
    RepairEngine::new(llm, sandbox, Arc::new(PromptLoader::embedded_only()), options)
}

fn real_sandbox() -> PythonSandbox {
    PythonSandbox::new(SolverCapability::new("python3", "gurobipy"), 64 * 1024)
}

fn runtime_error() -> Result<ExecutionOutcome, oragent::SandboxError> {
    Ok(ExecutionOutcome::RuntimeError {
        message: "GurobiError: Unable to retrieve attribute 'X'".into(),
        stack: "Traceback (most recent call last):\n  File \"main.py\", line 9".into(),
    })
}

// =============================================================================
// Termination and budget
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_loop_never_exceeds_budget(max_attempts in 0u32..6, failing_kind in 0usize..4) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let llm = Arc::new(ScriptedLlmClient::from_fn(|_| Ok(fenced("print('no answer')"))));
            let sandbox = Arc::new(ScriptedSandbox::from_fn(move |_| {
                Ok(match failing_kind {
                    0 => ExecutionOutcome::CompileError { message: "SyntaxError: invalid syntax (line 1)".into() },
                    1 => ExecutionOutcome::RuntimeError { message: "ZeroDivisionError: division by zero".into(), stack: String::new() },
                    2 => ExecutionOutcome::Timeout { elapsed_ms: 5 },
                    _ => ExecutionOutcome::NoResultProduced,
                })
            }));
            let engine = engine_with(llm.clone(), sandbox.clone(), fast_options());

            let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), max_attempts, "gpt-4o").await;

            prop_assert!(!result.is_solved());
            prop_assert_eq!(result.attempts_used(), max_attempts);
            prop_assert_eq!(sandbox.programs().len() as u32, max_attempts);
            prop_assert!(llm.call_count() as u32 <= max_attempts);
            let indices: Vec<u32> = result.attempts().iter().map(|a| a.index).collect();
            prop_assert_eq!(indices, (0..max_attempts).collect::<Vec<_>>());
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_solved_on_first_attempt_records_one_attempt() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("print('RESULT: 100')"))]));
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Ok(ExecutionOutcome::Success {
        answer: Answer::Optimal { value: 100.0 },
        raw_output: "RESULT: 100".into(),
    })]));
    let engine = engine_with(llm, sandbox, fast_options());

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 5, "gpt-4o").await;
    match result {
        SolveResult::Solved {
            attempt_index,
            attempts,
            ..
        } => {
            assert_eq!(attempt_index, 0);
            assert_eq!(attempts.len(), 1);
        }
        other => panic!("expected Solved, got {:?}", other),
    }
}

#[tokio::test]
async fn test_repair_prompt_keeps_history_bounded() {
    let llm = Arc::new(ScriptedLlmClient::from_fn(|_| Ok(fenced("m.optimize()"))));
    let sandbox = Arc::new(ScriptedSandbox::from_fn(|_| runtime_error()));
    let options = RepairOptions {
        history_entries: 2,
        history_max_chars: 200,
        ..fast_options()
    };
    let engine = engine_with(llm.clone(), sandbox, options);

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 6, "gpt-4o").await;
    assert_eq!(result.attempts_used(), 6);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 6);
    // The last repair prompt sees only the two most recent failures
    let last = prompts.last().unwrap();
    assert_eq!(last.matches("GurobiError").count(), 2, "prompt: {}", last);
    assert!(last.contains("m.optimize()"));
    // The first prompt has no failure history at all
    assert!(!prompts[0].contains("GurobiError"));
}

#[tokio::test]
async fn test_transient_errors_do_not_consume_budget() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::RateLimited {
            retry_after: Duration::from_millis(1),
        }),
        Err(LlmError::Timeout(Duration::from_secs(120))),
        Ok(fenced("print('RESULT: 100')")),
    ]));
    let sandbox = Arc::new(ScriptedSandbox::new(vec![Ok(ExecutionOutcome::Success {
        answer: Answer::Optimal { value: 100.0 },
        raw_output: String::new(),
    })]));
    let engine = engine_with(llm.clone(), sandbox, fast_options());

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 1, "gpt-4o").await;
    assert!(result.is_solved());
    assert_eq!(result.attempts_used(), 1);
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_permanent_provider_error_stops_immediately() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::ApiError {
        status: 401,
        message: "invalid api key".into(),
    })]));
    let sandbox = Arc::new(ScriptedSandbox::new(vec![]));
    let engine = engine_with(llm.clone(), sandbox.clone(), fast_options());

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 5, "gpt-4o").await;
    match &result {
        SolveResult::Exhausted {
            reason: ExhaustionReason::ProviderFailed { .. },
            attempts,
        } => assert!(attempts.is_empty()),
        other => panic!("expected ProviderFailed, got {:?}", other),
    }
    assert_eq!(llm.call_count(), 1);
    assert!(sandbox.programs().is_empty());
    assert!(result.error_message().unwrap().contains("model provider failed"));
}

#[tokio::test]
async fn test_launch_failure_consumes_one_attempt_and_loop_continues() {
    let llm = Arc::new(ScriptedLlmClient::from_fn(|_| Ok(fenced("print('RESULT: 100')"))));
    let sandbox = Arc::new(ScriptedSandbox::new(vec![
        Ok(ExecutionOutcome::RuntimeError {
            message: "sandbox could not start the program: Resource temporarily unavailable (os error 11)".into(),
            stack: String::new(),
        }),
        Ok(ExecutionOutcome::Success {
            answer: Answer::Optimal { value: 100.0 },
            raw_output: String::new(),
        }),
    ]));
    let engine = engine_with(llm.clone(), sandbox.clone(), fast_options());

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 3, "gpt-4o").await;
    match &result {
        SolveResult::Solved {
            attempt_index,
            attempts,
            ..
        } => {
            assert_eq!(*attempt_index, 1);
            assert_eq!(attempts[0].outcome.kind(), OutcomeKind::RuntimeError);
        }
        other => panic!("expected Solved, got {:?}", other),
    }
    assert_eq!(sandbox.programs().len(), 2);
    // The repair prompt tells the model what went wrong with the launch
    assert!(llm.prompts()[1].contains("sandbox could not start the program"));
}

#[tokio::test]
async fn test_shared_engine_keeps_loops_independent() {
    // Each problem statement names the value its program should print
    let llm = Arc::new(ScriptedLlmClient::from_fn(|req| {
        let text = &req.messages[0].content;
        let value = text
            .split_whitespace()
            .find_map(|w| w.strip_prefix("VALUE="))
            .unwrap_or("0")
            .to_string();
        Ok(fenced(&format!("print('RESULT: {}')", value)))
    }));
    let sandbox = Arc::new(
        ScriptedSandbox::from_fn(|program| {
            let value: f64 = program
                .trim()
                .trim_start_matches("print('RESULT: ")
                .trim_end_matches("')")
                .parse()
                .unwrap_or(f64::NAN);
            Ok(ExecutionOutcome::Success {
                answer: Answer::Optimal { value },
                raw_output: String::new(),
            })
        })
        .with_delay(Duration::from_millis(20)),
    );
    let engine = Arc::new(engine_with(llm, sandbox.clone(), fast_options()));

    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let problem = ProblemSpec::new(format!("problem VALUE={}", i));
            engine.solve(&problem, 2, "gpt-4o").await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.answer(), Some(Answer::Optimal { value: i as f64 }));
    }
    assert!(sandbox.max_in_flight() > 1);
}

// =============================================================================
// Real sandbox
// =============================================================================

#[tokio::test]
async fn test_real_sandbox_compile_error_then_repair() {
    let sandbox = real_sandbox();
    if !sandbox.is_available().await {
        return; // skip if python3 not available
    }

    let broken = "def solve(:\n    return 0\n";
    let fixed = "best = max(3 * x + 4 * y for x in range(41) for y in range(41) if 2 * x + y <= 40 and x + 3 * y <= 60)\nprint('RESULT:', best)\n";
    let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced(broken)), Ok(fenced(fixed))]));
    let options = RepairOptions {
        execution_timeout: Duration::from_secs(20),
        ..fast_options()
    };
    let engine = engine_with(llm.clone(), Arc::new(sandbox), options);

    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 3, "gpt-4o").await;
    match &result {
        SolveResult::Solved {
            attempt_index,
            answer,
            attempts,
            ..
        } => {
            assert_eq!(*attempt_index, 1);
            assert_eq!(attempts[0].outcome.kind(), OutcomeKind::CompileError);
            assert!(matches!(answer, Answer::Optimal { .. }));
            // x=12, y=16
            assert_eq!(answer.value(), Some(100.0));
        }
        other => panic!("expected Solved, got {:?}", other),
    }
    // The repair prompt carried the failing program and the syntax error
    let prompts = llm.prompts();
    assert!(prompts[1].contains("def solve(:"));
    assert!(prompts[1].contains("SyntaxError"));
}

#[tokio::test]
async fn test_real_sandbox_single_attempt_timeout() {
    let sandbox = real_sandbox();
    if !sandbox.is_available().await {
        return;
    }

    let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(fenced("while True:\n    pass"))]));
    let timeout = Duration::from_millis(500);
    let options = RepairOptions {
        execution_timeout: timeout,
        ..fast_options()
    };
    let engine = engine_with(llm, Arc::new(sandbox), options);

    let started = Instant::now();
    let result = engine.solve(&ProblemSpec::new(LP_PROBLEM), 1, "gpt-4o").await;
    assert!(started.elapsed() < timeout + Duration::from_secs(3));

    match &result {
        SolveResult::Exhausted {
            reason: ExhaustionReason::BudgetSpent,
            attempts,
        } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].outcome.kind(), OutcomeKind::Timeout);
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}
