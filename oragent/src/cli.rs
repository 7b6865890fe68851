//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use crate::config::{Config, GenerationMode, SandboxConfig};

/// oragent - solve operations-research problems with generated programs
#[derive(Parser)]
#[command(
    name = "ora",
    about = "Turn natural-language optimization problems into solved programs",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Model id (e.g. gpt-4o, claude-sonnet-4, gemini-1.5-pro, ollama:qwen2.5)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Attempts (generate + execute cycles) per problem
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Solve one problem
    Solve {
        /// Problem statement, or @path to read it from a file
        question: String,

        /// How the first program is produced
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Solve every problem in a JSONL, JSON array or dataset file
    Batch {
        /// Input file
        input: PathBuf,

        /// Problems solved at the same time
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Write the JSONL report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// How the first program is produced
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Run the HTTP tool service
    Serve {
        /// Address to bind (host:port)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

/// Generation mode as given on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Direct,
    Formulate,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Direct => GenerationMode::Direct,
            ModeArg::Formulate => GenerationMode::Formulate,
        }
    }
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        debug!(model = ?self.model, max_attempts = ?self.max_attempts, "Cli::apply_overrides: called");
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.repair.max_attempts = max_attempts;
        }
        match &self.command {
            Command::Solve { mode, .. } => {
                if let Some(mode) = mode {
                    config.repair.mode = (*mode).into();
                }
            }
            Command::Batch { concurrency, mode, .. } => {
                if let Some(concurrency) = concurrency {
                    config.batch.concurrency = *concurrency;
                }
                if let Some(mode) = mode {
                    config.repair.mode = (*mode).into();
                }
            }
            Command::Serve { bind } => {
                if let Some(bind) = bind {
                    config.server.bind = bind.clone();
                }
            }
        }
    }
}

/// Resolve a question argument: `@path` reads the file, anything else is literal
pub fn read_question(arg: &str) -> Result<String> {
    debug!(arg_len = arg.len(), "read_question: called");
    match arg.strip_prefix('@') {
        Some(path) => {
            let text = std::fs::read_to_string(path).context(format!("Failed to read question file {}", path))?;
            Ok(text.trim().to_string())
        }
        None => Ok(arg.trim().to_string()),
    }
}

/// Result of checking a required tool
pub struct ToolCheck {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &str, program: &str, args: &[&str]) -> Self {
        debug!(name, program, ?args, "ToolCheck::check: called");
        let result = std::process::Command::new(program).args(args).output();

        match result {
            Ok(output) if output.status.success() => {
                debug!(name, "ToolCheck::check: tool available");
                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                Self {
                    name: name.to_string(),
                    available: true,
                    version: Some(parse_version(&text)),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name: name.to_string(),
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// Parse version from command output (extracts first version-like string)
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Check the interpreter and the solver library programs will need
pub fn check_required_tools(sandbox: &SandboxConfig) -> Vec<ToolCheck> {
    debug!(interpreter = %sandbox.interpreter, library = %sandbox.solver_library, "check_required_tools: called");
    let import = format!(
        "import importlib.metadata as m; print(m.version('{}'))",
        sandbox.solver_library
    );
    vec![
        ToolCheck::check(&sandbox.interpreter, &sandbox.interpreter, &["--version"]),
        ToolCheck::check(&sandbox.solver_library, &sandbox.interpreter, &["-c", &import]),
    ]
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("oragent")
        .join("logs")
        .join("oragent.log")
}

/// Generate the after_help text with tool checks
pub fn generate_after_help(sandbox: &SandboxConfig) -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Required Tools:\n");
    for tool in check_required_tools(sandbox) {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}
