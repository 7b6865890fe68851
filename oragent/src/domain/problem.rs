//! ProblemSpec - one natural-language optimization problem

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::Answer;

/// A problem submitted for solving. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
    /// Caller-supplied or generated identifier
    #[serde(default)]
    pub id: String,

    /// The natural-language problem statement
    #[serde(alias = "question", alias = "user_question")]
    pub statement: String,

    /// Optional structured hints
    #[serde(default, skip_serializing_if = "ProblemHints::is_empty")]
    pub hints: ProblemHints,

    /// Ground-truth answer, only used by batch evaluation
    ///
    /// A missing key means no ground truth; an explicit `null` means the
    /// problem has no solution.
    #[serde(
        default,
        alias = "answer",
        deserialize_with = "null_means_no_solution",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected: Option<ExpectedAnswer>,
}

impl ProblemSpec {
    /// Create a problem with a freshly generated id
    pub fn new(statement: impl Into<String>) -> Self {
        let id = uuid::Uuid::now_v7().to_string();
        debug!(%id, "ProblemSpec::new: called");
        Self {
            id,
            statement: statement.into(),
            hints: ProblemHints::default(),
            expected: None,
        }
    }

    /// Builder: set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: attach a ground-truth answer
    pub fn with_expected(mut self, expected: ExpectedAnswer) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Builder: attach hints
    pub fn with_hints(mut self, hints: ProblemHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Structured hints that may accompany a problem statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemHints {
    /// Decision variable names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,

    /// Known constraints, one per entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

impl ProblemHints {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.constraints.is_empty()
    }
}

fn null_means_no_solution<'de, D>(deserializer: D) -> Result<Option<ExpectedAnswer>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<ExpectedAnswer>::deserialize(deserializer)?;
    Ok(Some(value.unwrap_or(ExpectedAnswer::NoSolution)))
}

/// Ground truth as found in datasets: a number, a word, or null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedAnswer {
    Number(f64),
    Text(String),
    /// Recorded as `null`: the problem is infeasible
    NoSolution,
}

impl ExpectedAnswer {
    /// Interpret the ground truth as an Answer, if it is one
    ///
    /// Numeric strings ("42", " 3.5 ") count as numbers; "infeasible" and
    /// "unbounded" (any case) map to their statuses. Datasets write a problem
    /// without a solution as `null` or "None", both read as infeasible.
    pub fn resolve(&self) -> Option<Answer> {
        debug!(?self, "ExpectedAnswer::resolve: called");
        match self {
            ExpectedAnswer::Number(value) if value.is_finite() => Some(Answer::Optimal { value: *value }),
            ExpectedAnswer::Number(_) => None,
            ExpectedAnswer::NoSolution => Some(Answer::Infeasible),
            ExpectedAnswer::Text(text) => {
                let text = text.trim();
                if let Ok(value) = text.parse::<f64>() {
                    return value.is_finite().then_some(Answer::Optimal { value });
                }
                match text.to_ascii_lowercase().as_str() {
                    "infeasible" | "none" => Some(Answer::Infeasible),
                    "unbounded" => Some(Answer::Unbounded),
                    _ => None,
                }
            }
        }
    }
}
