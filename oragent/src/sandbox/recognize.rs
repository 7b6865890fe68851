//! Result recognition on program output
//!
//! Programs are asked to end with `RESULT: <number>`, `RESULT: INFEASIBLE` or
//! `RESULT: UNBOUNDED`. When they don't, the solver's own log lines are used:
//! `Model is infeasible`, `Model is unbounded`, `Best objective <n>`,
//! `Optimal objective <n>`. Gurobi's ambiguous `Model is infeasible or
//! unbounded` is not an answer.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::Answer;

static RESULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*RESULT\s*:\s*(\S+)\s*$").expect("valid regex"));
static BEST_OBJECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Best objective\s+([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)").expect("valid regex")
});
static OPTIMAL_OBJECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Optimal objective\s+([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)").expect("valid regex")
});

/// Find the answer a program printed, if any
///
/// The last well-formed `RESULT:` line wins. Non-finite numbers are returned
/// as-is; the caller decides what to do with them.
pub fn recognize_answer(stdout: &str) -> Option<Answer> {
    debug!(stdout_len = stdout.len(), "recognize_answer: called");

    let explicit = RESULT_RE
        .captures_iter(stdout)
        .filter_map(|caps| parse_result_token(&caps[1]))
        .last();
    if explicit.is_some() {
        debug!(?explicit, "recognize_answer: RESULT line");
        return explicit;
    }

    // Ambiguous status: not a proof of either, so nothing is recognized
    if stdout.contains("Model is infeasible or unbounded") || stdout.contains("Infeasible or unbounded model") {
        debug!("recognize_answer: solver reported infeasible or unbounded");
        return None;
    }
    if stdout.contains("Model is infeasible") || stdout.contains("Infeasible model") {
        debug!("recognize_answer: solver reported infeasible");
        return Some(Answer::Infeasible);
    }
    if stdout.contains("Model is unbounded") || stdout.contains("Unbounded model") {
        debug!("recognize_answer: solver reported unbounded");
        return Some(Answer::Unbounded);
    }

    let fallback = [&*BEST_OBJECTIVE_RE, &*OPTIMAL_OBJECTIVE_RE].into_iter().find_map(|re| {
        re.captures_iter(stdout)
            .last()
            .and_then(|caps| caps[1].parse::<f64>().ok())
    });
    debug!(?fallback, "recognize_answer: solver log fallback");
    fallback.map(|value| Answer::Optimal { value })
}

fn parse_result_token(token: &str) -> Option<Answer> {
    match token.to_ascii_uppercase().as_str() {
        "INFEASIBLE" => Some(Answer::Infeasible),
        "UNBOUNDED" => Some(Answer::Unbounded),
        _ => token.parse::<f64>().ok().map(|value| Answer::Optimal { value }),
    }
}

/// The line of a traceback that names the exception
///
/// Python prints it last and unindented (`ValueError: ...`).
pub fn last_exception_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| !l.starts_with(' ') && !l.starts_with('\t') && !l.starts_with("Traceback"))
        .or_else(|| lines.last())
        .map(|l| l.trim().to_string())
}

/// Keep at most `max_chars` characters from the end of `text`
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skip = total - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("...[{} chars truncated]\n{}", skip, tail)
}
