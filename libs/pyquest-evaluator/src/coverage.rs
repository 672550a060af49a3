//! Coverage challenges: the program is fixed and the student picks inputs
//! that make it print a target output.
//!
//! Inputs are bound into the program's global scope as typed values; the
//! program text itself is never rewritten.

use crate::harness;
use crate::interpreter::Session;
use crate::oracle;
use crate::parser;
use pyquest_common::types::{CoverageChallenge, CoverageReport, CoverageSection, InputParam, ParamKind};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("missing value for '{0}'")]
    Missing(String),

    #[error("'{name}' must be a number, got '{value}'")]
    NotANumber { name: String, value: String },

    #[error("'{name}' must be true or false, got '{value}'")]
    NotABoolean { name: String, value: String },
}

fn parse_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::from(int));
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Convert the student's raw text into typed values, one per declared
/// parameter. Extra entries are ignored.
pub fn bind_params(
    params: &[InputParam],
    user_input: &BTreeMap<String, String>,
) -> Result<Map<String, Value>, BindError> {
    let mut bindings = Map::new();
    for param in params {
        let raw = user_input
            .get(&param.name)
            .ok_or_else(|| BindError::Missing(param.name.clone()))?;

        let value = match param.kind {
            ParamKind::String => Value::String(raw.clone()),
            ParamKind::Number => parse_number(raw).ok_or_else(|| BindError::NotANumber {
                name: param.name.clone(),
                value: raw.clone(),
            })?,
            ParamKind::Boolean => Value::Bool(parse_bool(raw).ok_or_else(|| BindError::NotABoolean {
                name: param.name.clone(),
                value: raw.clone(),
            })?),
        };
        bindings.insert(param.name.clone(), value);
    }
    Ok(bindings)
}

fn grade(challenge: &mut CoverageChallenge, actual: String, correct: bool) -> bool {
    challenge.actual_output = Some(actual);
    challenge.is_correct = Some(correct);
    correct
}

/// Run the program with the challenge's `user_input` bound, then record the
/// output and whether it matches. Returns the new `is_correct`.
pub async fn evaluate_challenge(
    session: &Session,
    code: &str,
    params: &[InputParam],
    challenge: &mut CoverageChallenge,
) -> bool {
    let user_input = challenge.user_input.clone().unwrap_or_default();
    let bindings = match bind_params(params, &user_input) {
        Ok(bindings) => bindings,
        Err(e) => return grade(challenge, e.to_string(), false),
    };

    let run = match session.run(&harness::synthesize_coverage(code, &bindings)).await {
        Ok(raw) => parser::parse_results(&raw),
        Err(e) => Err(e),
    };

    match run.map(|parsed| parsed.outcomes.into_iter().next()) {
        Ok(Some(outcome)) if !outcome.error => {
            let printed = outcome.actual.as_str().unwrap_or_default().trim().to_string();
            let correct = oracle::compare_stdout(&printed, &challenge.expected_output);
            grade(challenge, printed, correct)
        }
        Ok(Some(outcome)) => {
            let message = outcome.actual.as_str().unwrap_or("program raised").to_string();
            grade(challenge, message, false)
        }
        Ok(None) => grade(challenge, "no output was recorded".to_string(), false),
        Err(e) => {
            debug!(challenge_id = %challenge.id, error = %e, "Coverage run failed");
            grade(challenge, e.to_string(), false)
        }
    }
}

/// A section is complete when every challenge is independently correct.
pub fn section_complete(challenges: &[CoverageChallenge]) -> bool {
    !challenges.is_empty() && challenges.iter().all(|c| c.is_correct == Some(true))
}

/// Grade every challenge the student submitted input for. The others keep
/// whatever state they arrived with, so earlier correct answers still count.
pub async fn evaluate_section(
    session: &Session,
    section: &CoverageSection,
    inputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> CoverageReport {
    let mut challenges = section.challenges.clone();
    for challenge in challenges.iter_mut() {
        if let Some(input) = inputs.get(&challenge.id) {
            challenge.user_input = Some(input.clone());
            evaluate_challenge(session, &section.code, &section.input_params, challenge).await;
        }
    }

    let correct_count = challenges.iter().filter(|c| c.is_correct == Some(true)).count();
    let all_correct = section_complete(&challenges);
    info!(
        section_id = %section.id,
        correct = correct_count,
        total = challenges.len(),
        "Coverage section evaluated"
    );

    CoverageReport {
        challenges,
        correct_count,
        all_correct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{RESULTS_BEGIN, RESULTS_END};
    use crate::interpreter::scripted::ScriptedInterpreter;
    use serde_json::json;
    use std::time::Duration;

    fn number(name: &str) -> InputParam {
        InputParam {
            name: name.to_string(),
            kind: ParamKind::Number,
            placeholder: None,
        }
    }

    fn input(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn printed(stdout: &str) -> String {
        format!(
            "\n{}\n{}\n{}\n",
            RESULTS_BEGIN,
            json!({ "outcomes": [{ "index": 0, "actual": stdout, "error": false, "opaque": false, "stdout": "" }] }),
            RESULTS_END
        )
    }

    fn section() -> CoverageSection {
        CoverageSection {
            id: "cov".to_string(),
            title: "Make it print 10".to_string(),
            content: String::new(),
            code: "print(a + b)".to_string(),
            input_params: vec![number("a"), number("b")],
            challenges: vec![
                CoverageChallenge {
                    id: "ten".to_string(),
                    expected_output: "10".to_string(),
                    ..Default::default()
                },
                CoverageChallenge {
                    id: "zero".to_string(),
                    expected_output: "0".to_string(),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_bind_params_types_values() {
        let params = vec![
            number("n"),
            number("x"),
            InputParam {
                name: "s".to_string(),
                kind: ParamKind::String,
                placeholder: None,
            },
            InputParam {
                name: "flag".to_string(),
                kind: ParamKind::Boolean,
                placeholder: None,
            },
        ];
        let bound = bind_params(
            &params,
            &input(&[("n", " 4 "), ("x", "2.5"), ("s", "it's \"quoted\""), ("flag", "True"), ("extra", "1")]),
        )
        .unwrap();

        assert_eq!(bound["n"], json!(4));
        assert_eq!(bound["x"], json!(2.5));
        assert_eq!(bound["s"], json!("it's \"quoted\""));
        assert_eq!(bound["flag"], json!(true));
        assert!(!bound.contains_key("extra"));
    }

    #[test]
    fn test_bind_params_errors() {
        let params = vec![number("a")];
        assert_eq!(bind_params(&params, &input(&[])), Err(BindError::Missing("a".to_string())));
        assert!(matches!(
            bind_params(&params, &input(&[("a", "four")])),
            Err(BindError::NotANumber { .. })
        ));
        assert!(bind_params(&params, &input(&[("a", "NaN")])).is_err());
    }

    #[tokio::test]
    async fn test_correct_inputs_mark_challenge_correct() {
        let backend = ScriptedInterpreter::new();
        let probe = backend.clone();
        backend.push_stdout(&printed("10\n"));
        let session = Session::new(backend, Duration::from_secs(5));

        let mut challenge = section().challenges[0].clone();
        challenge.user_input = Some(input(&[("a", "4"), ("b", "6")]));
        assert!(evaluate_challenge(&session, "print(a + b)", &section().input_params, &mut challenge).await);
        assert_eq!(challenge.actual_output.as_deref(), Some("10"));
        assert_eq!(challenge.is_correct, Some(true));
        assert!(!probe.executed()[0].contains("print(a + b)"));
    }

    #[tokio::test]
    async fn test_one_wrong_challenge_keeps_section_incomplete() {
        let backend = ScriptedInterpreter::new();
        backend.push_stdout(&printed("10\n"));
        backend.push_stdout(&printed("1\n"));
        let session = Session::new(backend, Duration::from_secs(5));

        let mut inputs = BTreeMap::new();
        inputs.insert("ten".to_string(), input(&[("a", "4"), ("b", "6")]));
        inputs.insert("zero".to_string(), input(&[("a", "4"), ("b", "-3")]));

        let report = evaluate_section(&session, &section(), &inputs).await;
        assert_eq!(report.correct_count, 1);
        assert!(!report.all_correct);
        assert_eq!(report.challenges[1].actual_output.as_deref(), Some("1"));
        assert_eq!(report.challenges[1].is_correct, Some(false));
    }

    #[tokio::test]
    async fn test_bad_input_is_reported_without_running() {
        let backend = ScriptedInterpreter::new();
        let probe = backend.clone();
        let session = Session::new(backend, Duration::from_secs(5));

        let mut challenge = section().challenges[0].clone();
        challenge.user_input = Some(input(&[("a", "4"), ("b", "six")]));
        assert!(!evaluate_challenge(&session, "print(a + b)", &section().input_params, &mut challenge).await);
        assert_eq!(challenge.actual_output.as_deref(), Some("'b' must be a number, got 'six'"));
        assert!(probe.executed().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_is_recorded_as_output() {
        let backend = ScriptedInterpreter::new();
        backend.push_stdout(&format!(
            "\n{}\n{}\n{}\n",
            RESULTS_BEGIN,
            json!({ "outcomes": [{ "index": 0, "actual": "TypeError: unsupported operand", "error": true }] }),
            RESULTS_END
        ));
        let session = Session::new(backend, Duration::from_secs(5));

        let mut challenge = section().challenges[0].clone();
        challenge.user_input = Some(input(&[("a", "4"), ("b", "6")]));
        assert!(!evaluate_challenge(&session, "print(a + b)", &section().input_params, &mut challenge).await);
        assert_eq!(challenge.actual_output.as_deref(), Some("TypeError: unsupported operand"));
    }

    #[tokio::test]
    async fn test_challenges_without_new_input_keep_their_state() {
        let backend = ScriptedInterpreter::new();
        let probe = backend.clone();
        backend.push_stdout(&printed("0\n"));
        let session = Session::new(backend, Duration::from_secs(5));

        let mut earlier = section();
        earlier.challenges[0].user_input = Some(input(&[("a", "4"), ("b", "6")]));
        earlier.challenges[0].actual_output = Some("10".to_string());
        earlier.challenges[0].is_correct = Some(true);

        let mut inputs = BTreeMap::new();
        inputs.insert("zero".to_string(), input(&[("a", "0"), ("b", "0")]));

        let report = evaluate_section(&session, &earlier, &inputs).await;
        assert!(report.all_correct);
        assert_eq!(report.correct_count, 2);
        assert_eq!(probe.executed().len(), 1);
    }

    #[test]
    fn test_section_complete_requires_every_challenge() {
        let mut challenges = section().challenges;
        assert!(!section_complete(&challenges));
        challenges[0].is_correct = Some(true);
        assert!(!section_complete(&challenges));
        challenges[1].is_correct = Some(true);
        assert!(section_complete(&challenges));
        assert!(!section_complete(&[]));
    }
}
