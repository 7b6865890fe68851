//! oragent configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::llm::CompletionOptions;

/// Main oragent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model and backend configuration
    pub llm: LlmConfig,

    /// Repair loop budget and retry policy
    pub repair: RepairConfig,

    /// Program execution environment
    pub sandbox: SandboxConfig,

    /// Batch orchestration
    pub batch: BatchConfig,

    /// Tool service
    pub server: ServerConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(eyre::eyre!("llm.model must not be empty"));
        }
        if self.repair.max_attempts == 0 {
            return Err(eyre::eyre!("repair.max-attempts must be at least 1"));
        }
        if self.sandbox.execution_timeout_ms == 0 {
            return Err(eyre::eyre!("sandbox.execution-timeout-ms must be greater than 0"));
        }
        if self.batch.concurrency == 0 {
            return Err(eyre::eyre!("batch.concurrency must be at least 1"));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(eyre::eyre!("server.max-concurrent-requests must be at least 1"));
        }
        if self.server.max_attempts_cap == 0 {
            return Err(eyre::eyre!("server.max-attempts-cap must be at least 1"));
        }
        if !self.batch.tolerance.is_finite() || self.batch.tolerance < 0.0 {
            return Err(eyre::eyre!("batch.tolerance must be a non-negative number"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .oragent.yml
        let local_config = PathBuf::from(".oragent.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/oragent/oragent.yml
        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load_file_chain(config_path).ok().and_then(|c| c.log_level)
    }

    /// Apply `ORAGENT_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        debug!("apply_env_overrides: called");
        if let Some(model) = env_value("ORAGENT_MODEL") {
            debug!(%model, "apply_env_overrides: ORAGENT_MODEL");
            self.llm.model = model;
        }
        if let Some(url) = env_value("ORAGENT_LOCAL_BASE_URL").or_else(|| env_value("OLLAMA_API_BASE")) {
            debug!(%url, "apply_env_overrides: local base url");
            self.llm.local_base_url = url;
        }
        if let Some(url) = env_value("ORAGENT_OPENAI_BASE_URL").or_else(|| env_value("OPENAI_API_BASE")) {
            debug!(%url, "apply_env_overrides: openai base url");
            self.llm.openai.base_url = url;
        }
        if let Some(v) = env_value("ORAGENT_MAX_ATTEMPTS") {
            self.repair.max_attempts = v
                .parse()
                .context(format!("ORAGENT_MAX_ATTEMPTS is not a number: {}", v))?;
        }
        if let Some(v) = env_value("ORAGENT_EXECUTION_TIMEOUT_MS") {
            self.sandbox.execution_timeout_ms = v
                .parse()
                .context(format!("ORAGENT_EXECUTION_TIMEOUT_MS is not a number: {}", v))?;
        }
        if let Some(v) = env_value("ORAGENT_CONCURRENCY") {
            self.batch.concurrency = v
                .parse()
                .context(format!("ORAGENT_CONCURRENCY is not a number: {}", v))?;
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("oragent").join("oragent.yml"))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One remote backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Variables tried in order when `api-key-env` is unset
    #[serde(rename = "api-key-fallback-env", default, skip_serializing_if = "Vec::is_empty")]
    pub api_key_fallback_env: Vec<String>,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            api_key_fallback_env: Vec::new(),
        }
    }

    /// Builder: add a fallback key variable
    pub fn with_fallback_env(mut self, name: impl Into<String>) -> Self {
        self.api_key_fallback_env.push(name.into());
        self
    }

    /// The first non-empty key among the configured variables
    pub fn api_key(&self) -> Option<String> {
        std::iter::once(&self.api_key_env)
            .chain(&self.api_key_fallback_env)
            .find_map(|name| env_value(name))
    }

    /// Every variable consulted for the key, for error messages
    pub fn key_env_names(&self) -> String {
        std::iter::once(&self.api_key_env)
            .chain(&self.api_key_fallback_env)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Default model id (`gpt-4o`, `claude-...`, `gemini-...`, `ollama:<name>`)
    pub model: String,

    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    pub openai: BackendConfig,

    pub anthropic: BackendConfig,

    pub gemini: BackendConfig,

    /// Base URL of the local OpenAI-compatible server
    #[serde(rename = "local-base-url")]
    pub local_base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            timeout_ms: 120_000,
            openai: BackendConfig::new("https://api.openai.com", "OPENAI_API_KEY"),
            anthropic: BackendConfig::new("https://api.anthropic.com", "ANTHROPIC_API_KEY")
                .with_fallback_env("CLAUDE_API_KEY"),
            gemini: BackendConfig::new("https://generativelanguage.googleapis.com", "GEMINI_API_KEY"),
            local_base_url: "http://localhost:11434".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// How the first program is produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    /// Ask for the program straight from the problem statement
    #[default]
    Direct,
    /// Ask for a mathematical model first, then code against it
    Formulate,
}

/// Repair loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Attempts (generate + execute cycles) per problem
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Retries of one completion request after transient provider errors
    #[serde(rename = "transient-retries")]
    pub transient_retries: u32,

    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Failures kept in the repair prompt
    #[serde(rename = "history-entries")]
    pub history_entries: usize,

    /// Per-entry cap on error text in the repair prompt
    #[serde(rename = "history-max-chars")]
    pub history_max_chars: usize,

    pub mode: GenerationMode,

    /// In formulate mode, have the model audit its formulation before coding
    #[serde(rename = "review-formulation")]
    pub review_formulation: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transient_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            history_entries: 3,
            history_max_chars: 1500,
            mode: GenerationMode::Direct,
            review_formulation: true,
        }
    }
}

/// Program execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Python interpreter used to check and run programs
    pub interpreter: String,

    /// Solver library programs are asked to use
    #[serde(rename = "solver-library")]
    pub solver_library: String,

    /// Extra environment passed to programs (license files etc.)
    pub env: BTreeMap<String, String>,

    #[serde(rename = "execution-timeout-ms")]
    pub execution_timeout_ms: u64,

    /// Cap on captured stdout/stderr bytes per stream
    #[serde(rename = "max-output-bytes")]
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            solver_library: "gurobipy".to_string(),
            env: BTreeMap::new(),
            execution_timeout_ms: 60_000,
            max_output_bytes: 256 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Problems solved at once
    pub concurrency: usize,

    /// Absolute tolerance when comparing against ground truth
    pub tolerance: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            tolerance: 0.1,
        }
    }
}

/// Tool service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,

    #[serde(rename = "max-concurrent-requests")]
    pub max_concurrent_requests: usize,

    /// Upper bound on a caller's max_attempts override
    #[serde(rename = "max-attempts-cap")]
    pub max_attempts_cap: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5050".to_string(),
            max_concurrent_requests: 8,
            max_attempts_cap: 10,
        }
    }
}
