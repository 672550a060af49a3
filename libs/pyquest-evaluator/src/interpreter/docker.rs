/// Docker interpreter backend
///
/// **Docker Execution Rules:**
/// 1. Pulls the Python image if not present
/// 2. Creates one container per run with:
///    - Network disabled
///    - CPU/memory limits enforced
/// 3. Injects the program base64-encoded through an environment variable
/// 4. Captures stdout/stderr streams and the exit code
/// 5. Removes the container afterwards, even when the run is cancelled by
///    the session timeout
use super::{InterpreterBackend, RawRun};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use pyquest_common::config::EvaluatorConfig;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Decodes and runs the program carried in PYQUEST_SOURCE as `__main__`
const BOOTSTRAP: &str = "import base64, os\n\
src = base64.b64decode(os.environ['PYQUEST_SOURCE']).decode('utf-8')\n\
exec(compile(src, '<harness>', 'exec'), {'__name__': '__main__'})\n";

/// Environment strings above this size are rejected by the kernel
const MAX_ENV_PAYLOAD_BYTES: usize = 128 * 1024;

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop; force removal also kills a running container
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

pub struct DockerInterpreter {
    docker: Docker,
    image: String,
    memory_limit_bytes: i64,
    nano_cpus: i64,
    max_source_bytes: usize,
}

impl DockerInterpreter {
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EvalError::HarnessStartup(format!("Failed to connect to Docker daemon: {}", e)))?;

        Ok(Self {
            docker,
            image: config.docker_image.clone(),
            memory_limit_bytes: (config.memory_limit_mb as i64) * 1024 * 1024,
            nano_cpus: (config.cpu_limit as f64 * 1_000_000_000.0) as i64,
            max_source_bytes: config.max_source_bytes.min(MAX_ENV_PAYLOAD_BYTES * 3 / 4),
        })
    }

    /// Ensure the image is available, pulling it on a cache miss
    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                EvalError::HarnessStartup(format!("Failed to pull image {}: {}", self.image, e))
            })?;
        }

        info!(image = %self.image, "Image pulled");
        Ok(())
    }
}

fn docker_error(context: &str, e: bollard::errors::Error) -> EvalError {
    EvalError::Interpreter(format!("{}: {}", context, e))
}

#[async_trait]
impl InterpreterBackend for DockerInterpreter {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn boot(&self) -> Result<String> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| EvalError::HarnessStartup(format!("Docker daemon unreachable: {}", e)))?;
        self.ensure_image().await?;

        Ok(format!(
            "docker {} / {}",
            version.version.unwrap_or_else(|| "unknown".to_string()),
            self.image
        ))
    }

    async fn execute(&self, source: &str) -> Result<RawRun> {
        if source.len() > self.max_source_bytes {
            return Err(EvalError::Interpreter(format!(
                "Source exceeds maximum size of {} bytes",
                self.max_source_bytes
            )));
        }

        let container_name = format!("pyquest-{}", uuid::Uuid::new_v4());
        let env = vec![
            format!("PYQUEST_SOURCE={}", general_purpose::STANDARD.encode(source)),
            "PYTHONIOENCODING=utf-8".to_string(),
        ];

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "python3".to_string(),
                "-u".to_string(),
                "-c".to_string(),
                BOOTSTRAP.to_string(),
            ]),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit_bytes),
                nano_cpus: Some(self.nano_cpus),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| docker_error("Failed to create container", e))?;

        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };

        let start = Instant::now();
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| docker_error("Failed to start container", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let mut logs = self.docker.logs(&container.id, logs_options);
        while let Some(output) = logs.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
                Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut exit_code = None;
        let mut wait = self.docker.wait_container(&container.id, Some(wait_options));
        match wait.next().await {
            Some(Ok(response)) => exit_code = Some(response.status_code),
            // Non-zero exits surface as an error carrying the status code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                exit_code = Some(code)
            }
            Some(Err(e)) => return Err(docker_error("Failed to wait for container", e)),
            None => warn!("No wait response from container"),
        }

        if exit_code == Some(137) {
            stderr.push_str("\nMemoryError: container killed (memory limit exceeded)\n");
        }

        Ok(RawRun {
            stdout,
            stderr,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
