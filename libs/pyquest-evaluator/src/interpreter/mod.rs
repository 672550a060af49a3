//! Sandboxed interpreter adapter.
//!
//! A backend knows HOW to run a Python program and hands back raw output.
//! It knows nothing about test cases, sentinels or scoring. [`Session`]
//! wraps a backend with one-time boot, run serialisation and a wall-clock
//! timeout.

pub mod docker;
pub mod process;
pub mod session;

#[cfg(test)]
pub mod scripted;


use crate::error::Result;
use async_trait::async_trait;

pub use docker::DockerInterpreter;
pub use process::ProcessInterpreter;
pub use session::Session;

/// Raw output of one interpreter run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub duration_ms: u64,
}

impl RawRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last non-empty stderr line, which for a Python traceback is
    /// `<ExceptionType>: <message>`.
    pub fn error_line(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|line| !line.is_empty())
    }

    /// Captured stdout, with a raised error folded in as an `Error: ...`
    /// line instead of being thrown.
    pub fn combined_output(&self) -> String {
        if self.succeeded() {
            return self.stdout.clone();
        }

        let message = self.error_line().unwrap_or("program exited abnormally");
        let mut output = self.stdout.clone();
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str("Error: ");
        output.push_str(message);
        output
    }
}

/// An embedded-language runtime capable of running a complete program.
#[async_trait]
pub trait InterpreterBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Bring the runtime up and return a version banner.
    async fn boot(&self) -> Result<String>;

    /// Run `source` to completion, capturing stdout and stderr.
    async fn execute(&self, source: &str) -> Result<RawRun>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_run_returns_stdout_only() {
        let run = RawRun {
            stdout: "hello\n".to_string(),
            stderr: "warning: ignored\n".to_string(),
            exit_code: Some(0),
            duration_ms: 3,
        };
        assert_eq!(run.combined_output(), "hello\n");
    }

    #[test]
    fn test_raised_error_becomes_error_line() {
        let run = RawRun {
            stdout: "partial".to_string(),
            stderr: "Traceback (most recent call last):\n  File \"<stdin>\", line 1\nZeroDivisionError: division by zero\n\n".to_string(),
            exit_code: Some(1),
            duration_ms: 3,
        };
        assert_eq!(run.error_line(), Some("ZeroDivisionError: division by zero"));
        assert_eq!(
            run.combined_output(),
            "partial\nError: ZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn test_abnormal_exit_without_stderr() {
        let run = RawRun {
            exit_code: Some(137),
            ..Default::default()
        };
        assert_eq!(run.combined_output(), "Error: program exited abnormally");
    }
}
