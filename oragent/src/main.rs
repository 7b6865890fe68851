//! oragent - operations-research problem solver
//!
//! CLI entry point: solve one problem, run a batch, or serve the tool API.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result, eyre};
use tokio::sync::broadcast;
use tracing::{debug, info};

use oragent::batch::{BatchOrchestrator, load_problems, write_report};
use oragent::cli::{Cli, Command, generate_after_help, read_question};
use oragent::config::{Config, SandboxConfig};
use oragent::domain::{Answer, OutcomeKind, ProblemSpec, SolveResult};
use oragent::events::{EventBus, OrEvent, create_event_bus};
use oragent::llm::CompletionGateway;
use oragent::prompts::PromptLoader;
use oragent::repair::{RepairEngine, RepairOptions};
use oragent::sandbox::{PythonSandbox, Sandbox};
use oragent::server::{self, AppState};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("oragent")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("oragent.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help(&SandboxConfig::default()));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    info!("oragent loaded config: model={}", config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Solve { question, json, .. } => cmd_solve(&config, &question, json).await,
        Command::Batch { input, output, .. } => cmd_batch(&config, &input, output.as_deref()).await,
        Command::Serve { .. } => cmd_serve(&config).await,
    }
}

/// Wire gateway, sandbox, prompts and events into one shared engine
fn build_engine(config: &Config, bus: Arc<EventBus>) -> Result<Arc<RepairEngine>> {
    let llm = Arc::new(CompletionGateway::from_config(&config.llm));
    let sandbox = Arc::new(PythonSandbox::from_config(&config.sandbox));
    let root = std::env::current_dir().context("Failed to read current directory")?;
    let prompts = Arc::new(PromptLoader::new(root));
    let engine = RepairEngine::new(llm, sandbox, prompts, RepairOptions::from_config(config)).with_events(bus);
    Ok(Arc::new(engine))
}

async fn ensure_sandbox(config: &Config) -> Result<()> {
    let sandbox = PythonSandbox::from_config(&config.sandbox);
    if !sandbox.is_available().await {
        return Err(eyre!(
            "Interpreter '{}' is not available; set sandbox.interpreter in the config",
            config.sandbox.interpreter
        ));
    }
    Ok(())
}

/// Print per-attempt progress for one problem on stderr
fn spawn_attempt_printer(mut rx: broadcast::Receiver<OrEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(OrEvent::FormulationStarted { .. }) => eprintln!("{} formulating model", "→".cyan()),
                Ok(OrEvent::AttemptStarted { attempt, .. }) => {
                    eprintln!("{} attempt {}", "→".cyan(), attempt + 1)
                }
                Ok(OrEvent::AttemptFinished {
                    outcome, duration_ms, ..
                }) => {
                    let label = outcome.to_string();
                    let label = if outcome == OutcomeKind::Success {
                        label.green()
                    } else {
                        label.yellow()
                    };
                    eprintln!("  {} {}", label, format!("({} ms)", duration_ms).dimmed());
                }
                Ok(OrEvent::ProviderRetry { retry, backoff_ms, error, .. }) => {
                    eprintln!("  {} retry {} in {} ms: {}", "!".yellow(), retry, backoff_ms, error)
                }
                Ok(OrEvent::ProblemFinished { .. }) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    })
}

/// Print batch progress on stderr
fn spawn_batch_printer(mut rx: broadcast::Receiver<OrEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(OrEvent::BatchProgress {
                    completed,
                    total,
                    solved,
                }) => {
                    eprintln!("{} {}/{} done, {} solved", "→".cyan(), completed, total, solved);
                    if completed == total {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                _ => {}
            }
        }
    })
}

fn describe_answer(answer: &Answer) -> ColoredString {
    match answer {
        Answer::Optimal { value } => value.to_string().green().bold(),
        Answer::Infeasible => "INFEASIBLE".yellow().bold(),
        Answer::Unbounded => "UNBOUNDED".yellow().bold(),
    }
}

async fn cmd_solve(config: &Config, question: &str, json: bool) -> Result<()> {
    debug!(json, "cmd_solve: called");
    let statement = read_question(question)?;
    if statement.is_empty() {
        return Err(eyre!("The problem statement is empty"));
    }
    ensure_sandbox(config).await?;

    let bus = create_event_bus();
    let printer = (!json).then(|| spawn_attempt_printer(bus.subscribe()));
    let engine = build_engine(config, bus)?;

    let problem = ProblemSpec::new(statement);
    let result = engine
        .solve(&problem, config.repair.max_attempts, &config.llm.model)
        .await;
    drop(engine);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary())?);
        return if result.is_solved() {
            Ok(())
        } else {
            Err(eyre!("Problem not solved"))
        };
    }

    match &result {
        SolveResult::Solved {
            attempt_index,
            answer,
            program,
            ..
        } => {
            println!("{}\n", program.dimmed());
            println!(
                "{} Answer: {} (attempt {} of {})",
                "✓".green(),
                describe_answer(answer),
                attempt_index + 1,
                config.repair.max_attempts
            );
            Ok(())
        }
        SolveResult::Exhausted { .. } => {
            let message = result.error_message().unwrap_or_default();
            println!("{} {}", "✗".red(), message);
            Err(eyre!("Problem not solved"))
        }
    }
}

async fn cmd_batch(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    debug!(?input, ?output, "cmd_batch: called");
    let problems = load_problems(input).context("Failed to load batch input")?;
    if problems.is_empty() {
        println!("No problems found in {}", input.display());
        return Ok(());
    }
    ensure_sandbox(config).await?;

    let bus = create_event_bus();
    let printer = spawn_batch_printer(bus.subscribe());
    let engine = build_engine(config, bus)?;

    eprintln!(
        "Solving {} problems with {} (concurrency {}, {} attempts each)",
        problems.len().to_string().cyan(),
        config.llm.model.cyan(),
        config.batch.concurrency,
        config.repair.max_attempts
    );

    let run = BatchOrchestrator::new(engine)
        .with_tolerance(config.batch.tolerance)
        .run(
            problems,
            config.batch.concurrency,
            config.repair.max_attempts,
            &config.llm.model,
        )
        .await;
    let _ = printer.await;

    match output {
        Some(path) => {
            let file = fs::File::create(path).context(format!("Failed to create {}", path.display()))?;
            write_report(&run, std::io::BufWriter::new(file))?;
            eprintln!("{} Report written to {}", "✓".green(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            write_report(&run, stdout.lock())?;
        }
    }

    let stats = run.stats();
    let mut err = std::io::stderr();
    writeln!(
        err,
        "Solved {}/{} ({} exhausted, {} attempts)",
        stats.solved.to_string().green(),
        stats.total,
        stats.exhausted.to_string().red(),
        stats.total_attempts
    )?;
    if let Some(accuracy) = stats.accuracy() {
        writeln!(
            err,
            "Accuracy: {} ({}/{} correct)",
            format!("{:.1}%", accuracy * 100.0).bold(),
            stats.correct,
            stats.evaluated
        )?;
    }
    Ok(())
}

async fn cmd_serve(config: &Config) -> Result<()> {
    debug!(bind = %config.server.bind, "cmd_serve: called");
    ensure_sandbox(config).await?;
    let engine = build_engine(config, create_event_bus())?;
    let state = Arc::new(AppState::new(engine, config));
    println!("oragent tool server on http://{} (Ctrl+C to stop)", config.server.bind);
    server::serve(state, &config.server.bind).await
}
