//! Answer evaluation against ground truth

use tracing::debug;

use crate::domain::{Answer, ProblemSpec, SolveResult};

/// Default absolute tolerance for numeric answers
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Whether `answer` matches `expected`
///
/// Optimal values match within `tolerance` (absolute); statuses must be equal.
pub fn answers_match(answer: Answer, expected: Answer, tolerance: f64) -> bool {
    match (answer, expected) {
        (Answer::Optimal { value }, Answer::Optimal { value: want }) => (value - want).abs() <= tolerance,
        (got, want) => got == want,
    }
}

/// Evaluate one result; None when the problem carries no usable ground truth
pub fn evaluate(problem: &ProblemSpec, result: &SolveResult, tolerance: f64) -> Option<bool> {
    let expected = problem.expected.as_ref()?.resolve()?;
    let correct = result
        .answer()
        .is_some_and(|answer| answers_match(answer, expected, tolerance));
    debug!(problem_id = %problem.id, ?expected, answer = ?result.answer(), correct, "evaluate: called");
    Some(correct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExhaustionReason, ExpectedAnswer};

    fn solved(answer: Answer) -> SolveResult {
        SolveResult::Solved {
            attempt_index: 0,
            answer,
            program: String::new(),
            attempts: vec![],
        }
    }

    #[test]
    fn test_tolerance_is_absolute() {
        let want = Answer::Optimal { value: 100.0 };
        assert!(answers_match(Answer::Optimal { value: 100.05 }, want, 0.1));
        assert!(answers_match(Answer::Optimal { value: 99.9 }, want, 0.1));
        assert!(!answers_match(Answer::Optimal { value: 100.2 }, want, 0.1));
    }

    #[test]
    fn test_status_answers() {
        assert!(answers_match(Answer::Infeasible, Answer::Infeasible, 0.1));
        assert!(!answers_match(Answer::Infeasible, Answer::Unbounded, 0.1));
        assert!(!answers_match(Answer::Infeasible, Answer::Optimal { value: 0.0 }, 0.1));
    }

    #[test]
    fn test_evaluate() {
        let problem = ProblemSpec::new("x").with_expected(ExpectedAnswer::Text("42".into()));
        assert_eq!(evaluate(&problem, &solved(Answer::Optimal { value: 42.0 }), 0.1), Some(true));
        assert_eq!(evaluate(&problem, &solved(Answer::Optimal { value: 41.0 }), 0.1), Some(false));

        let exhausted = SolveResult::Exhausted {
            attempts: vec![],
            reason: ExhaustionReason::BudgetSpent,
        };
        assert_eq!(evaluate(&problem, &exhausted, 0.1), Some(false));

        let no_truth = ProblemSpec::new("x");
        assert_eq!(evaluate(&no_truth, &exhausted, 0.1), None);

        let garbage = ProblemSpec::new("x").with_expected(ExpectedAnswer::Text("see appendix".into()));
        assert_eq!(evaluate(&garbage, &exhausted, 0.1), None);
    }

    #[test]
    fn test_expected_infeasible() {
        let problem = ProblemSpec::new("x").with_expected(ExpectedAnswer::Text("Infeasible".into()));
        assert_eq!(evaluate(&problem, &solved(Answer::Infeasible), 0.1), Some(true));
    }

    #[test]
    fn test_no_solution_ground_truth_is_evaluated() {
        for problem in [
            ProblemSpec::new("x").with_expected(ExpectedAnswer::NoSolution),
            ProblemSpec::new("x").with_expected(ExpectedAnswer::Text("None".into())),
            serde_json::from_str(r#"{"question": "x", "answer": null}"#).unwrap(),
        ] {
            assert_eq!(evaluate(&problem, &solved(Answer::Infeasible), 0.1), Some(true));
            assert_eq!(evaluate(&problem, &solved(Answer::Optimal { value: 0.0 }), 0.1), Some(false));
        }
    }
}
