use super::{DockerInterpreter, InterpreterBackend, ProcessInterpreter, RawRun};
use crate::error::{EvalError, Result};
use pyquest_common::config::{Backend, EvaluatorConfig};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// One interpreter instance shared by every evaluation on a page/worker.
///
/// The interpreter is single-threaded: runs share global state, so a
/// second run must not start before the first one's output capture is torn
/// down. `run_lock` enforces that explicitly rather than relying on callers
/// awaiting in order.
pub struct Session {
    backend: Box<dyn InterpreterBackend>,
    banner: OnceCell<String>,
    run_lock: Mutex<()>,
    timeout: Duration,
}

impl Session {
    pub fn new<B: InterpreterBackend + 'static>(backend: B, timeout: Duration) -> Self {
        Self {
            backend: Box::new(backend),
            banner: OnceCell::new(),
            run_lock: Mutex::new(()),
            timeout,
        }
    }

    /// Build a session for the backend named in the configuration
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        match config.backend {
            Backend::Process => Ok(Self::new(ProcessInterpreter::from_config(config), timeout)),
            Backend::Docker => Ok(Self::new(DockerInterpreter::from_config(config)?, timeout)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Boot the interpreter once. Concurrent callers share the in-flight
    /// boot; a failed boot is retried by the next caller.
    pub async fn initialize(&self) -> Result<&str> {
        let banner = self
            .banner
            .get_or_try_init(|| async {
                let start = Instant::now();
                info!(backend = self.backend.name(), "Booting interpreter");
                let banner = self.backend.boot().await.map_err(|e| match e {
                    EvalError::HarnessStartup(_) => e,
                    other => EvalError::HarnessStartup(other.to_string()),
                })?;
                info!(
                    backend = self.backend.name(),
                    banner = %banner,
                    boot_ms = start.elapsed().as_millis() as u64,
                    "Interpreter ready"
                );
                Ok::<String, EvalError>(banner)
            })
            .await?;
        Ok(banner.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.banner.initialized()
    }

    /// Run a program and return its raw output.
    pub async fn run_raw(&self, source: &str) -> Result<RawRun> {
        self.initialize().await?;

        let _guard = self.run_lock.lock().await;
        let timeout_ms = self.timeout.as_millis() as u64;

        match tokio::time::timeout(self.timeout, self.backend.execute(source)).await {
            Ok(Ok(run)) => {
                debug!(
                    backend = self.backend.name(),
                    exit_code = ?run.exit_code,
                    duration_ms = run.duration_ms,
                    stdout_bytes = run.stdout.len(),
                    "Run finished"
                );
                Ok(run)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(backend = self.backend.name(), timeout_ms, "Run timed out");
                Err(EvalError::Timeout(timeout_ms))
            }
        }
    }

    /// Run a program and return its stdout. A program that raised yields its
    /// output followed by `Error: <message>`; only infrastructure failures
    /// and timeouts are returned as `Err`.
    pub async fn run(&self, source: &str) -> Result<String> {
        Ok(self.run_raw(source).await?.combined_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::scripted::ScriptedInterpreter;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_initialize_is_memoized() {
        let backend = ScriptedInterpreter::new();
        let probe = backend.clone();
        let session = Arc::new(Session::new(backend, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.initialize().await.map(|b| b.to_string())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "Scripted 1.0");
        }
        assert_eq!(probe.boot_count(), 1);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_boot_failure_is_harness_startup() {
        let backend = ScriptedInterpreter::new();
        backend.fail_boot("no interpreter on PATH");
        let session = Session::new(backend, Duration::from_secs(5));

        let err = session.run("print(1)").await.unwrap_err();
        assert!(matches!(err, EvalError::HarnessStartup(_)));
    }

    #[tokio::test]
    async fn test_runs_are_serialized() {
        let backend = ScriptedInterpreter::new().with_delay(Duration::from_millis(20));
        let probe = backend.clone();
        for i in 0..4 {
            backend.push_stdout(&format!("run {}\n", i));
        }
        let session = Arc::new(Session::new(backend, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let session = session.clone();
            handles.push(tokio::spawn(async move { session.run("print()").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(probe.max_concurrent_runs(), 1);
        assert_eq!(probe.executed().len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let backend = ScriptedInterpreter::new().with_delay(Duration::from_millis(200));
        backend.push_stdout("never seen");
        let session = Session::new(backend, Duration::from_millis(20));

        let err = session.run("while True: pass").await.unwrap_err();
        assert!(matches!(err, EvalError::Timeout(20)));
    }

    #[tokio::test]
    async fn test_raised_error_is_folded_into_output() {
        let backend = ScriptedInterpreter::new();
        backend.push_failure("", "NameError: name 'x' is not defined");
        let session = Session::new(backend, Duration::from_secs(5));

        let output = session.run("print(x)").await.unwrap();
        assert_eq!(output, "Error: NameError: name 'x' is not defined");
    }
}
