/// Comparison Oracle - Type-Aware Pass/Fail Decisions
///
/// **Core Responsibility:**
/// Decide whether one case's actual value matches its expected value.
///
/// **Critical Properties:**
/// - Knows nothing about interpreters or sentinels
/// - Pure function: (case, reported outcome) -> TestResult
///
/// **Comparison Rules:**
/// - Stdout: exact after trimming leading/trailing whitespace of the whole
///   block (internal blank lines, quotes and punctuation must match)
/// - Numbers: |a-b| <= max(rel_tol * max(|a|,|b|), abs_tol)
/// - Booleans never equal numbers
/// - Lists/dicts: element-wise with the same rules
/// - Case sensitivity: YES
use crate::parser::CaseOutcome;
use pyquest_common::config::EvaluatorConfig;
use pyquest_common::types::{FunctionTarget, TestCase, TestResult};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rel: f64,
    pub abs: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rel: 0.01, abs: 1e-6 }
    }
}

impl From<&EvaluatorConfig> for Tolerance {
    fn from(config: &EvaluatorConfig) -> Self {
        Self {
            rel: config.numeric_rel_tol,
            abs: config.numeric_abs_tol,
        }
    }
}

/// Trim only the whole block; everything inside must match
fn normalize_output(output: &str) -> &str {
    output.trim()
}

pub fn compare_stdout(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

pub fn approx_eq(actual: f64, expected: f64, tol: Tolerance) -> bool {
    if actual == expected {
        return true;
    }
    if !actual.is_finite() || !expected.is_finite() {
        return false;
    }
    let diff = (actual - expected).abs();
    let scale = actual.abs().max(expected.abs());
    diff <= (tol.rel * scale).max(tol.abs)
}

/// Type-aware equality between a returned value and the expected value
pub fn compare_values(actual: &Value, expected: &Value, tol: Tolerance) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(e)) => match (a.as_f64(), e.as_f64()) {
            (Some(a), Some(e)) => approx_eq(a, e, tol),
            _ => a == e,
        },
        (Value::String(a), Value::String(e)) => a == e,
        (Value::Bool(a), Value::Bool(e)) => a == e,
        (Value::Null, Value::Null) => true,
        (Value::Array(a), Value::Array(e)) => {
            a.len() == e.len() && a.iter().zip(e).all(|(a, e)| compare_values(a, e, tol))
        }
        (Value::Object(a), Value::Object(e)) => {
            a.len() == e.len()
                && a.iter()
                    .all(|(key, a)| e.get(key).is_some_and(|e| compare_values(a, e, tol)))
        }
        _ => false,
    }
}

/// Expected values for stdout cases may be authored as strings or as bare
/// numbers (`expected: 10` for a program printing `10`).
pub(crate) fn expected_as_text(expected: &Value) -> String {
    match expected {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Judge one case from the harness's report
pub fn judge_case(
    case: &TestCase,
    outcome: &CaseOutcome,
    target: &FunctionTarget,
    tol: Tolerance,
) -> TestResult {
    let passed = if outcome.error {
        false
    } else {
        match target {
            FunctionTarget::Main => match &outcome.actual {
                Value::String(actual) => compare_stdout(actual, &expected_as_text(&case.expected)),
                _ => false,
            },
            FunctionTarget::Function(_) if outcome.opaque => match (&outcome.actual, &case.expected) {
                (Value::String(repr), Value::String(expected)) => repr == expected,
                _ => false,
            },
            FunctionTarget::Function(_) => compare_values(&outcome.actual, &case.expected, tol),
        }
    };

    TestResult {
        input: case.input.clone(),
        expected: case.expected.clone(),
        actual: outcome.actual.clone(),
        passed,
        description: case.description.clone(),
        error: outcome.error,
    }
}

/// Result for a case the harness did not report on
pub fn missing_case(case: &TestCase) -> TestResult {
    TestResult {
        input: case.input.clone(),
        expected: case.expected.clone(),
        actual: Value::String("no result reported for this case".to_string()),
        passed: false,
        description: case.description.clone(),
        error: true,
    }
}

/// Judge every case in declaration order
pub fn judge_all(
    cases: &[TestCase],
    outcomes: &[CaseOutcome],
    target: &FunctionTarget,
    tol: Tolerance,
) -> Vec<TestResult> {
    cases
        .iter()
        .enumerate()
        .map(|(idx, case)| match outcomes.iter().find(|o| o.index == idx) {
            Some(outcome) => judge_case(case, outcome, target, tol),
            None => missing_case(case),
        })
        .collect()
}
