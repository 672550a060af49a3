//! Evaluator error taxonomy.
//!
//! Every variant maps to a [`FailureKind`] tag that the reporting layer
//! stores alongside the message. None of these ever reach the UI as a Rust
//! error: [`crate::evaluator::Evaluator::evaluate`] folds them into a
//! [`pyquest_common::types::SectionReport`].

use pyquest_common::types::FailureKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    /// The interpreter could not boot. Fatal for every section on the page.
    #[error("interpreter failed to start: {0}")]
    HarnessStartup(String),

    /// Student source failed to compile. Holds the engine's own text.
    #[error("{0}")]
    StudentSyntax(String),

    #[error("{0}")]
    StudentIndentation(String),

    /// The harness never reached the test loop (no result sentinel).
    #[error("{0}")]
    Harness(String),

    /// Sentinel block present but undecodable: a synthesizer/parser mismatch.
    #[error("malformed harness results: {0}")]
    MalformedResults(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    #[error("turtle validation failed: {0}")]
    TurtleValidation(String),

    /// Infrastructure failure of an interpreter backend (spawn, docker, ...).
    #[error("interpreter error: {0}")]
    Interpreter(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EvalError::HarnessStartup(_) => FailureKind::HarnessStartup,
            EvalError::StudentSyntax(_) => FailureKind::StudentSyntax,
            EvalError::StudentIndentation(_) => FailureKind::StudentIndentation,
            EvalError::Harness(_) => FailureKind::Harness,
            EvalError::MalformedResults(_) => FailureKind::MalformedResults,
            EvalError::Timeout(_) => FailureKind::Timeout,
            EvalError::TurtleValidation(_) => FailureKind::TurtleValidation,
            EvalError::Interpreter(_) | EvalError::Io(_) => FailureKind::Interpreter,
        }
    }

    /// Failures caused by the student's program rather than by us.
    pub fn is_student_fault(&self) -> bool {
        matches!(
            self,
            EvalError::StudentSyntax(_)
                | EvalError::StudentIndentation(_)
                | EvalError::Harness(_)
                | EvalError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_errors_keep_engine_text_verbatim() {
        let err = EvalError::StudentSyntax("SyntaxError: invalid syntax (line 3)".to_string());
        assert_eq!(err.to_string(), "SyntaxError: invalid syntax (line 3)");
        assert_eq!(err.kind(), FailureKind::StudentSyntax);
        assert!(err.is_student_fault());
    }

    #[test]
    fn test_malformed_results_is_not_student_fault() {
        let err = EvalError::MalformedResults("expected value".to_string());
        assert!(!err.is_student_fault());
        assert_eq!(err.kind(), FailureKind::MalformedResults);
    }

    #[test]
    fn test_io_maps_to_interpreter_kind() {
        let err: EvalError = std::io::Error::other("broken pipe").into();
        assert_eq!(err.kind(), FailureKind::Interpreter);
    }
}
