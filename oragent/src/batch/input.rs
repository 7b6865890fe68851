//! Batch input parsing
//!
//! Accepted shapes:
//! - JSON Lines, one problem per line
//! - a JSON array of problems
//! - a dataset map `{ "<id>": { "question": ..., "answer": ... } }`
//!
//! Problems without an id get their position (0-based) as id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::ProblemSpec;

/// Problems that could not be read
#[derive(Debug, Error)]
pub enum BatchInputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid batch input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entry '{key}' in dataset: {source}")]
    Entry {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read problems from a file
pub fn load_problems(path: &Path) -> Result<Vec<ProblemSpec>, BatchInputError> {
    debug!(?path, "load_problems: called");
    let text = std::fs::read_to_string(path).map_err(|source| BatchInputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_problems(&text)
}

/// Parse problems from text in any accepted shape
pub fn parse_problems(text: &str) -> Result<Vec<ProblemSpec>, BatchInputError> {
    let trimmed = text.trim_start();
    let mut problems = if trimmed.starts_with('[') {
        debug!("parse_problems: JSON array");
        serde_json::from_str::<Vec<ProblemSpec>>(trimmed)?
    } else if trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) if !is_problem_object(&map) => {
                debug!(entries = map.len(), "parse_problems: dataset map");
                parse_dataset(map)?
            }
            // a single object, or several objects on separate lines
            _ => parse_lines(text)?,
        }
    } else {
        parse_lines(text)?
    };

    for (idx, problem) in problems.iter_mut().enumerate() {
        if problem.id.trim().is_empty() {
            problem.id = idx.to_string();
        }
    }
    debug!(count = problems.len(), "parse_problems: done");
    Ok(problems)
}

fn is_problem_object(map: &serde_json::Map<String, Value>) -> bool {
    ["statement", "question", "user_question"]
        .iter()
        .any(|key| map.get(*key).is_some_and(Value::is_string))
}

fn parse_lines(text: &str) -> Result<Vec<ProblemSpec>, BatchInputError> {
    debug!("parse_lines: JSON Lines");
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<ProblemSpec>(line).map_err(|source| BatchInputError::Line { line: idx + 1, source })
        })
        .collect()
}

fn parse_dataset(map: serde_json::Map<String, Value>) -> Result<Vec<ProblemSpec>, BatchInputError> {
    // numeric keys in numeric order, anything else after them in text order
    let mut numeric: BTreeMap<u64, (String, Value)> = BTreeMap::new();
    let mut other: BTreeMap<String, Value> = BTreeMap::new();
    for (key, value) in map {
        match key.trim().parse::<u64>() {
            Ok(n) => {
                numeric.insert(n, (key, value));
            }
            Err(_) => {
                other.insert(key, value);
            }
        }
    }

    numeric
        .into_values()
        .chain(other)
        .map(|(key, value)| {
            let mut problem: ProblemSpec = serde_json::from_value(value).map_err(|source| BatchInputError::Entry {
                key: key.clone(),
                source,
            })?;
            if problem.id.trim().is_empty() {
                problem.id = key;
            }
            Ok(problem)
        })
        .collect()
}
