//! Python sandbox - runs generated programs in a throwaway directory

use async_trait::async_trait;
use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::recognize::{last_exception_line, recognize_answer, truncate_tail};
use super::{Sandbox, SandboxError, SolverCapability};
use crate::config::SandboxConfig;
use crate::domain::ExecutionOutcome;

const PROGRAM_FILE: &str = "program.py";

/// Parses the program without executing it; prints one line on failure
const COMPILE_CHECK: &str = r#"
import ast, sys
try:
    with open(sys.argv[1], encoding="utf-8") as f:
        ast.parse(f.read(), filename=sys.argv[1])
except SyntaxError as e:
    sys.stderr.write(f"{type(e).__name__}: {e.msg} (line {e.lineno})\n")
    sys.exit(1)
except Exception as e:
    sys.stderr.write(f"{type(e).__name__}: {e}\n")
    sys.exit(1)
"#;

/// Characters of stderr kept in a runtime_error stack
const MAX_STACK_CHARS: usize = 4_000;

/// How long to wait for pipe readers after the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Executes Python programs with the configured solver capability
pub struct PythonSandbox {
    capability: SolverCapability,
    max_output_bytes: usize,
}

impl PythonSandbox {
    pub fn new(capability: SolverCapability, max_output_bytes: usize) -> Self {
        debug!(%capability, max_output_bytes, "PythonSandbox::new: called");
        Self {
            capability,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(SolverCapability::from_config(config), config.max_output_bytes)
    }

    /// Base command: cleared environment, private HOME, closed stdin, own process group
    fn command(&self, dir: &std::path::Path) -> Command {
        let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut cmd = Command::new(&self.capability.interpreter);
        cmd.current_dir(dir)
            .env_clear()
            .env("PATH", path)
            .env("HOME", dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1")
            .envs(&self.capability.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }

    /// Spawn a command and wait for it under `timeout`
    async fn execute(&self, mut cmd: Command, timeout: Duration) -> Result<Execution, SandboxError> {
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            interpreter: self.capability.interpreter.clone(),
            source,
        })?;
        let pgid = child.id();
        debug!(?pgid, ?timeout, "PythonSandbox::execute: spawned");

        let cap = self.max_output_bytes;
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_capped(s, cap)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_capped(s, cap)));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                // Not reaped, so the group is still ours to clean up
                kill_group(pgid);
                return Err(SandboxError::Wait(e));
            }
            Err(_) => {
                debug!("PythonSandbox::execute: timed out, killing");
                // The leader is not reaped yet, so the group id still names our group
                kill_group(pgid);
                if let Err(e) = child.kill().await {
                    debug!(%e, "PythonSandbox::execute: kill after killpg failed");
                }
                None
            }
        };
        let elapsed = started.elapsed();

        Ok(Execution {
            status,
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
            elapsed,
        })
    }

    fn classify(&self, run: Execution) -> ExecutionOutcome {
        let Some(status) = run.status else {
            return ExecutionOutcome::Timeout {
                elapsed_ms: run.elapsed.as_millis() as u64,
            };
        };

        if status.success() {
            return match recognize_answer(&run.stdout) {
                Some(answer) => ExecutionOutcome::Success {
                    answer,
                    raw_output: truncate_tail(&run.stdout, MAX_STACK_CHARS),
                }
                .sanitized(),
                None => {
                    debug!("PythonSandbox::classify: exit 0 but no recognizable result");
                    ExecutionOutcome::NoResultProduced
                }
            };
        }

        let message = match (status.code(), status.signal()) {
            (_, Some(signal)) => format!("program was terminated by signal {}", signal),
            (code, None) => last_exception_line(&run.stderr)
                .unwrap_or_else(|| format!("program exited with status {}", code.unwrap_or(-1))),
        };
        ExecutionOutcome::RuntimeError {
            message,
            stack: truncate_tail(&run.stderr, MAX_STACK_CHARS),
        }
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    async fn run(&self, program: &str, timeout: Duration) -> Result<ExecutionOutcome, SandboxError> {
        debug!(program_len = program.len(), ?timeout, "PythonSandbox::run: called");
        let dir = tempfile::Builder::new()
            .prefix("oragent-")
            .tempdir()
            .map_err(SandboxError::CreateDir)?;
        let program_path = dir.path().join(PROGRAM_FILE);
        tokio::fs::write(&program_path, program)
            .await
            .map_err(SandboxError::WriteProgram)?;

        let started = Instant::now();

        // Compile check: parse only, never execute
        let mut check = self.command(dir.path());
        check.arg("-c").arg(COMPILE_CHECK).arg(PROGRAM_FILE);
        let checked = match self.execute(check, timeout).await {
            Ok(checked) => checked,
            Err(e) => return launch_failure(e),
        };
        match checked.status {
            None => {
                return Ok(ExecutionOutcome::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            Some(status) if !status.success() => {
                let message = last_exception_line(&checked.stderr)
                    .unwrap_or_else(|| "program could not be parsed".to_string());
                debug!(%message, "PythonSandbox::run: compile error");
                return Ok(ExecutionOutcome::CompileError { message });
            }
            Some(_) => {}
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let mut exec = self.command(dir.path());
        exec.arg(PROGRAM_FILE);
        let mut run = match self.execute(exec, remaining).await {
            Ok(run) => run,
            Err(e) => return launch_failure(e),
        };
        run.elapsed = started.elapsed();
        let outcome = self.classify(run);
        debug!(kind = %outcome.kind(), "PythonSandbox::run: classified");

        if let Err(e) = dir.close() {
            warn!(%e, "PythonSandbox::run: failed to remove sandbox directory");
        }
        Ok(outcome)
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.capability.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Raw result of one process run
struct Execution {
    /// None when the timeout fired
    status: Option<std::process::ExitStatus>,
    stdout: String,
    stderr: String,
    elapsed: Duration,
}

/// SIGKILL the whole process group led by `pgid`
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else { return };
    let Ok(raw) = i32::try_from(pgid) else { return };
    match nix::sys::signal::killpg(nix::unistd::Pid::from_raw(raw), nix::sys::signal::Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "kill_group: sent SIGKILL"),
        // ESRCH: group already empty
        Err(e) => debug!(pgid, %e, "kill_group: nothing to kill"),
    }
}

/// Decide whether a failed launch ends the solve or only the attempt
///
/// A missing or non-executable interpreter is an environment fault. Anything
/// else (fork limits, memory pressure, a failed wait) is charged to the attempt.
fn launch_failure(err: SandboxError) -> Result<ExecutionOutcome, SandboxError> {
    let message = match &err {
        SandboxError::Spawn { source, .. }
            if !matches!(source.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) =>
        {
            Some(format!("sandbox could not start the program: {}", source))
        }
        SandboxError::Wait(source) => Some(format!("sandbox lost track of the program: {}", source)),
        _ => None,
    };
    match message {
        Some(message) => {
            warn!(%message, "launch_failure: charging the attempt");
            Ok(ExecutionOutcome::RuntimeError {
                message,
                stack: String::new(),
            })
        }
        None => Err(err),
    }
}

/// Read a stream to the end, keeping the last `cap` bytes
///
/// Earlier output is dropped so the child never blocks on a full pipe and the
/// final result line survives heavy solver logging.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    let mut total = 0usize;
    // Trim in batches instead of on every read
    let slack = cap.max(buf.len());
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                kept.extend_from_slice(&buf[..n]);
                if kept.len() > cap + slack {
                    kept.drain(..kept.len() - cap);
                }
            }
            Err(e) => {
                debug!(%e, "read_capped: read error");
                break;
            }
        }
    }
    if kept.len() > cap {
        kept.drain(..kept.len() - cap);
    }
    let dropped = total - kept.len();
    if dropped == 0 {
        return kept;
    }
    debug!(dropped, "read_capped: output capped");
    let mut out = format!("...[{} bytes of output dropped]\n", dropped).into_bytes();
    out.extend_from_slice(&kept);
    out
}

async fn collect(handle: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            debug!(%e, "collect: reader task failed");
            String::new()
        }
        Err(_) => {
            debug!("collect: reader did not finish, output abandoned");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Answer, OutcomeKind};

    fn sandbox() -> PythonSandbox {
        PythonSandbox::new(SolverCapability::new("python3", "gurobipy"), 64 * 1024)
    }

    async fn available() -> bool {
        sandbox().is_available().await
    }

    #[tokio::test]
    async fn test_success_with_result_line() {
        if !available().await {
            return; // skip if python3 not available
        }
        let outcome = sandbox()
            .run("x = 40\nprint('RESULT:', x + 60)\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.answer(), Some(Answer::Optimal { value: 100.0 }));
    }

    #[tokio::test]
    async fn test_compile_error_does_not_execute() {
        if !available().await {
            return;
        }
        let program = "print('RESULT: 1')\ndef broken(:\n";
        let outcome = sandbox().run(program, Duration::from_secs(10)).await.unwrap();
        match outcome {
            ExecutionOutcome::CompileError { message } => {
                assert!(message.contains("SyntaxError"), "message: {}", message);
                assert!(message.contains("line 2"), "message: {}", message);
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runtime_error_reports_exception_line() {
        if !available().await {
            return;
        }
        let outcome = sandbox()
            .run("values = {}\nprint(values['missing'])\n", Duration::from_secs(10))
            .await
            .unwrap();
        match outcome {
            ExecutionOutcome::RuntimeError { message, stack } => {
                assert_eq!(message, "KeyError: 'missing'");
                assert!(stack.contains("Traceback"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_within_bound() {
        if !available().await {
            return;
        }
        let timeout = Duration::from_millis(500);
        let started = Instant::now();
        let outcome = sandbox().run("while True:\n    pass\n", timeout).await.unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert!(started.elapsed() < timeout + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_timeout_kills_child_processes() {
        if !available().await {
            return;
        }
        // The grandchild inherits the pipes; it must die with the group or run() would hang
        let program = "import subprocess, sys, time\nsubprocess.Popen([sys.executable, '-c', 'import time; time.sleep(60)'])\ntime.sleep(60)\n";
        let started = Instant::now();
        let outcome = sandbox().run(program, Duration::from_millis(500)).await.unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_no_result_and_non_finite() {
        if !available().await {
            return;
        }
        let outcome = sandbox().run("print('done')\n", Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::NoResultProduced);

        let outcome = sandbox()
            .run("print('RESULT:', float('nan'))\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::NoResultProduced);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_environment_is_cleared_and_injected() {
        if !available().await {
            return;
        }
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::set_var("ORAGENT_TEST_LEAK", "leaked") };
        let sb = PythonSandbox::new(
            SolverCapability::new("python3", "gurobipy").with_env("GRB_LICENSE_FILE", "/tmp/gurobi.lic"),
            64 * 1024,
        );
        let program = "import os\nassert 'ORAGENT_TEST_LEAK' not in os.environ\nassert os.environ['GRB_LICENSE_FILE'] == '/tmp/gurobi.lic'\nprint('RESULT: INFEASIBLE')\n";
        let outcome = sb.run(program, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.answer(), Some(Answer::Infeasible));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        if !available().await {
            return;
        }
        let sb = PythonSandbox::new(SolverCapability::new("python3", "gurobipy"), 1024);
        let outcome = sb
            .run("print('x' * 100000)\nprint('RESULT: 7')\n", Duration::from_secs(10))
            .await
            .unwrap();
        // The tail is kept, so the result printed after heavy logging survives
        assert_eq!(outcome.answer(), Some(Answer::Optimal { value: 7.0 }));
    }

    #[tokio::test]
    async fn test_read_capped_keeps_tail() {
        let mut input = "Gurobi log line\n".repeat(5_000);
        input.push_str("RESULT: 42\n");
        let kept = read_capped(input.as_bytes(), 64).await;
        let text = String::from_utf8(kept).unwrap();
        assert!(text.starts_with("...["), "text: {}", text);
        assert!(text.ends_with("RESULT: 42\n"));
        assert_eq!(recognize_answer(&text), Some(Answer::Optimal { value: 42.0 }));

        let short = read_capped("RESULT: 1\n".as_bytes(), 64).await;
        assert_eq!(short, b"RESULT: 1\n");
    }

    #[test]
    fn test_launch_failure_classification() {
        let transient = SandboxError::Spawn {
            interpreter: "python3".into(),
            source: std::io::Error::from(ErrorKind::WouldBlock),
        };
        match launch_failure(transient) {
            Ok(ExecutionOutcome::RuntimeError { message, .. }) => {
                assert!(message.starts_with("sandbox could not start the program"), "message: {}", message)
            }
            other => panic!("expected runtime error, got {:?}", other),
        }

        let lost = SandboxError::Wait(std::io::Error::other("interrupted"));
        assert_eq!(launch_failure(lost).unwrap().kind(), OutcomeKind::RuntimeError);

        for kind in [ErrorKind::NotFound, ErrorKind::PermissionDenied] {
            let missing = SandboxError::Spawn {
                interpreter: "python3".into(),
                source: std::io::Error::from(kind),
            };
            assert!(matches!(launch_failure(missing), Err(SandboxError::Spawn { .. })));
        }
    }

    #[tokio::test]
    async fn test_normal_exit_leaves_group_alone() {
        if !available().await {
            return;
        }
        // A detached helper outlives the program; a normal exit must not signal its group
        let marker_dir = tempfile::TempDir::new().unwrap();
        let marker = marker_dir.path().join("survived");
        let program = format!(
            "import subprocess, sys\nsubprocess.Popen([sys.executable, '-c', 'import time; time.sleep(0.3); open({:?}, \"w\").close()'], stdout=subprocess.DEVNULL, stderr=subprocess.DEVNULL)\nprint('RESULT: 1')\n",
            marker.display().to_string()
        );
        let outcome = sandbox().run(&program, Duration::from_secs(10)).await.unwrap();
        assert_eq!(outcome.answer(), Some(Answer::Optimal { value: 1.0 }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(marker.exists(), "helper process was killed after a normal exit");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_sandbox_error() {
        let sb = PythonSandbox::new(SolverCapability::new("/nonexistent/python", "gurobipy"), 1024);
        assert!(!sb.is_available().await);
        let err = sb.run("print(1)", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
