use super::{InterpreterBackend, RawRun};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use pyquest_common::config::EvaluatorConfig;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs programs with a local `python3`, one process per run.
///
/// Every run gets a fresh process, so each run has its own global
/// namespace. The source is written to the interpreter's stdin (`python3
/// -u -`), which keeps it off the command line and out of temp files.
#[derive(Debug, Clone)]
pub struct ProcessInterpreter {
    program: String,
    args: Vec<String>,
    max_source_bytes: usize,
}

impl ProcessInterpreter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            max_source_bytes: EvaluatorConfig::default().max_source_bytes,
        }
    }

    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self {
            program: config.python_command.clone(),
            args: config.python_args.clone(),
            max_source_bytes: config.max_source_bytes,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl InterpreterBackend for ProcessInterpreter {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn boot(&self) -> Result<String> {
        let output = self
            .command()
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EvalError::HarnessStartup(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(EvalError::HarnessStartup(format!(
                "{} --version exited with {}",
                self.program, output.status
            )));
        }

        // Older interpreters print the version on stderr
        let banner = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            String::from_utf8_lossy(&output.stdout)
        };
        Ok(banner.trim().to_string())
    }

    async fn execute(&self, source: &str) -> Result<RawRun> {
        if source.len() > self.max_source_bytes {
            return Err(EvalError::Interpreter(format!(
                "Source exceeds maximum size of {} bytes",
                self.max_source_bytes
            )));
        }

        let start = Instant::now();
        let mut child = self
            .command()
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EvalError::Interpreter(format!("failed to spawn {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(source.as_bytes()).await {
                Ok(()) => {}
                // The interpreter may exit before reading everything
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("interpreter closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;

        Ok(RawRun {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().map(i64::from),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_oversized_source_is_rejected_before_spawn() {
        let mut interpreter = ProcessInterpreter::new("definitely-not-python", vec![]);
        interpreter.max_source_bytes = 8;

        let err = interpreter.execute("print('far too long')").await.unwrap_err();
        assert!(matches!(err, EvalError::Interpreter(msg) if msg.contains("maximum size")));
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_boot() {
        let interpreter = ProcessInterpreter::new("definitely-not-python-3", vec![]);
        let err = interpreter.boot().await.unwrap_err();
        assert!(matches!(err, EvalError::HarnessStartup(_)));
    }
}
