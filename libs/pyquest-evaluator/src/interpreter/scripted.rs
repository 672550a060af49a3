// In-memory backend for tests: replays queued responses and records what
// it was asked to run.

use super::{InterpreterBackend, RawRun};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    responses: Mutex<VecDeque<RawRun>>,
    executed: Mutex<Vec<String>>,
    boot_error: Mutex<Option<String>>,
    boots: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedInterpreter {
    inner: Arc<Inner>,
    delay: Duration,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_boot(&self, message: &str) {
        *self.inner.boot_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn push(&self, run: RawRun) {
        self.inner.responses.lock().unwrap().push_back(run);
    }

    pub fn push_stdout(&self, stdout: &str) {
        self.push(RawRun {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            ..Default::default()
        });
    }

    pub fn push_failure(&self, stdout: &str, error_line: &str) {
        self.push(RawRun {
            stdout: stdout.to_string(),
            stderr: format!("Traceback (most recent call last):\n{}\n", error_line),
            exit_code: Some(1),
            ..Default::default()
        });
    }

    pub fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }

    pub fn boot_count(&self) -> usize {
        self.inner.boots.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterpreterBackend for ScriptedInterpreter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn boot(&self) -> Result<String> {
        self.inner.boots.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let boot_error = self.inner.boot_error.lock().unwrap().clone();
        match boot_error {
            Some(message) => Err(EvalError::HarnessStartup(message)),
            None => Ok("Scripted 1.0".to_string()),
        }
    }

    async fn execute(&self, source: &str) -> Result<RawRun> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.executed.lock().unwrap().push(source.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.inner.responses.lock().unwrap().pop_front();
        next.ok_or_else(|| EvalError::Interpreter("no scripted response queued".to_string()))
    }
}
