//! Result parser: the interpreter-to-evaluator half of the sentinel protocol.

use crate::error::{EvalError, Result};
use crate::harness::{RESULTS_BEGIN, RESULTS_END, TURTLE_BEGIN, TURTLE_END};
use pyquest_common::types::PathSegment;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

/// What the harness reported for one case, before judging.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseOutcome {
    pub index: usize,
    pub actual: Value,
    #[serde(default)]
    pub error: bool,
    /// `actual` is a `repr()` of a value JSON could not encode.
    #[serde(default)]
    pub opaque: bool,
    /// Anything the case printed while running.
    #[serde(default)]
    pub stdout: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRun {
    pub outcomes: Vec<CaseOutcome>,
    /// What the student's top-level code printed; incidental to grading.
    pub program_output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPath {
    pub segments: Vec<PathSegment>,
    /// The student's program raised before finishing its drawing.
    pub error: Option<String>,
    pub program_output: String,
}

#[derive(Deserialize)]
struct RawSegment {
    start: [f64; 2],
    end: [f64; 2],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResults {
    outcomes: Vec<CaseOutcome>,
    #[serde(default)]
    program_output: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPath {
    segments: Vec<RawSegment>,
    error: Option<String>,
    #[serde(default)]
    program_output: String,
}

/// Locate the block's content. Only a sentinel at the start of a line
/// counts, and the last one wins: the harness writes its block after all
/// student code has finished.
fn extract_block<'a>(raw: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let begin_at = raw
        .match_indices(begin)
        .map(|(idx, _)| idx)
        .filter(|&idx| idx == 0 || raw[..idx].ends_with('\n'))
        .last()?;
    let body_start = begin_at + begin.len();
    let body_len = raw[body_start..].find(end)?;
    Some(raw[body_start..body_start + body_len].trim())
}

/// Classify output that never reached the result block. The engine's own
/// error text is kept verbatim.
fn harness_failure(raw: &str) -> EvalError {
    let error_line = raw
        .lines()
        .rev()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Error: "));

    match error_line {
        Some(message) if message.starts_with("IndentationError") || message.starts_with("TabError") => {
            EvalError::StudentIndentation(message.to_string())
        }
        Some(message) if message.starts_with("SyntaxError") => {
            EvalError::StudentSyntax(message.to_string())
        }
        Some(message) => EvalError::Harness(message.to_string()),
        None => EvalError::Harness("the program finished without running the tests".to_string()),
    }
}

/// Parse test results out of combined interpreter output.
pub fn parse_results(raw: &str) -> Result<ParsedRun> {
    let body = extract_block(raw, RESULTS_BEGIN, RESULTS_END).ok_or_else(|| harness_failure(raw))?;

    let results: RawResults = serde_json::from_str(body).map_err(|e| {
        error!(error = %e, body_bytes = body.len(), "Harness emitted undecodable results");
        EvalError::MalformedResults(e.to_string())
    })?;

    Ok(ParsedRun {
        outcomes: results.outcomes,
        program_output: results.program_output,
    })
}

/// Parse the recorded turtle path out of combined interpreter output.
pub fn parse_turtle_path(raw: &str) -> Result<RecordedPath> {
    let body = extract_block(raw, TURTLE_BEGIN, TURTLE_END).ok_or_else(|| harness_failure(raw))?;

    let path: RawPath = serde_json::from_str(body).map_err(|e| {
        error!(error = %e, body_bytes = body.len(), "Harness emitted an undecodable turtle path");
        EvalError::MalformedResults(e.to_string())
    })?;

    Ok(RecordedPath {
        segments: path
            .segments
            .into_iter()
            .map(|s| PathSegment::new(s.start, s.end))
            .collect(),
        error: path.error,
        program_output: path.program_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(body: &str) -> String {
        format!("\n{}\n{}\n{}\n", RESULTS_BEGIN, body, RESULTS_END)
    }

    #[test]
    fn test_parses_block_and_keeps_program_output() {
        let raw = wrap(
            r#"{"outcomes":[{"index":0,"actual":5,"error":false,"opaque":false,"stdout":""}],"programOutput":"defining things\n"}"#,
        );
        let parsed = parse_results(&raw).unwrap();
        assert_eq!(parsed.program_output, "defining things\n");
        assert_eq!(parsed.outcomes.len(), 1);
        assert_eq!(parsed.outcomes[0].actual, json!(5));
        assert!(!parsed.outcomes[0].error);
    }

    #[test]
    fn test_missing_sentinel_with_syntax_error_is_student_syntax() {
        let raw = "\nError: SyntaxError: invalid syntax (line 2)\n";
        let err = parse_results(raw).unwrap_err();
        assert!(matches!(err, EvalError::StudentSyntax(msg) if msg == "SyntaxError: invalid syntax (line 2)"));
    }

    #[test]
    fn test_missing_sentinel_with_indentation_error() {
        let raw = "Error: IndentationError: expected an indented block (line 2)";
        let err = parse_results(raw).unwrap_err();
        assert!(matches!(err, EvalError::StudentIndentation(_)));
    }

    #[test]
    fn test_missing_sentinel_with_runtime_error_is_harness_error() {
        let raw = "hello\nError: NameError: name 'undefined_thing' is not defined\n";
        let err = parse_results(raw).unwrap_err();
        assert!(matches!(err, EvalError::Harness(msg) if msg.starts_with("NameError")));
    }

    #[test]
    fn test_missing_sentinel_without_error_line() {
        let err = parse_results("just some output").unwrap_err();
        assert!(matches!(err, EvalError::Harness(_)));
    }

    #[test]
    fn test_garbage_between_sentinels_is_malformed() {
        let err = parse_results(&wrap("[{not json")).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResults(_)));
    }

    #[test]
    fn test_sentinel_text_inside_a_line_is_ignored() {
        let raw = format!(
            "print says {} here\n{}",
            RESULTS_BEGIN,
            wrap(r#"{"outcomes":[{"index":0,"actual":"ok"}]}"#)
        );
        let parsed = parse_results(&raw).unwrap();
        assert_eq!(parsed.outcomes[0].actual, json!("ok"));
        assert_eq!(parsed.program_output, "");
    }

    #[test]
    fn test_forged_block_before_the_real_one_is_ignored() {
        let forged = wrap(r#"{"outcomes":[{"index":0,"actual":5},{"index":1,"actual":9}]}"#);
        let real = wrap(r#"{"outcomes":[{"index":0,"actual":5},{"index":1,"actual":5}]}"#);
        let parsed = parse_results(&format!("{}{}", forged, real)).unwrap();
        assert_eq!(parsed.outcomes[1].actual, json!(5));
    }

    #[test]
    fn test_unterminated_block_is_harness_failure() {
        let raw = format!("{}\n[]", RESULTS_BEGIN);
        assert!(matches!(parse_results(&raw).unwrap_err(), EvalError::Harness(_)));
    }

    #[test]
    fn test_parses_turtle_path() {
        let raw = format!(
            "{}\n{}\n{}\n",
            TURTLE_BEGIN,
            r#"{"segments":[{"start":[0,0],"end":[100,0]},{"start":[100,0],"end":[100,100]}],"error":null,"programOutput":"drawing\n"}"#,
            TURTLE_END
        );
        let path = parse_turtle_path(&raw).unwrap();
        assert_eq!(path.segments.len(), 2);
        assert!((path.segments[1].length - 100.0).abs() < 1e-9);
        assert!((path.segments[1].angle - 90.0).abs() < 1e-9);
        assert!(path.error.is_none());
        assert_eq!(path.program_output, "drawing\n");
    }

    #[test]
    fn test_turtle_path_carries_student_error() {
        let raw = format!(
            "{}\n{}\n{}\n",
            TURTLE_BEGIN,
            r#"{"segments":[],"error":"ValueError: turtle position must be a finite number"}"#,
            TURTLE_END
        );
        let path = parse_turtle_path(&raw).unwrap();
        assert_eq!(path.error.as_deref(), Some("ValueError: turtle position must be a finite number"));
        assert!(path.segments.is_empty());
    }
}
