// Evaluator configuration
// Loaded from config/evaluator.json, then overridden from the environment

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/evaluator.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local `python3` subprocess.
    Process,
    /// Python inside a network-less Docker container.
    Docker,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Process => write!(f, "process"),
            Backend::Docker => write!(f, "docker"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "process" => Ok(Backend::Process),
            "docker" => Ok(Backend::Docker),
            other => anyhow::bail!("Unknown backend '{}' (expected process or docker)", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub backend: Backend,
    pub python_command: String,
    pub python_args: Vec<String>,
    pub docker_image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub timeout_ms: u64,
    pub max_source_bytes: usize,
    pub numeric_rel_tol: f64,
    pub numeric_abs_tol: f64,
    pub turtle_length_tolerance_px: f64,
    pub turtle_angle_tolerance_deg: f64,
    pub turtle_similarity_threshold: f64,
    pub turtle_canvas: CanvasSize,
    pub turtle_match_radius_px: u32,
    pub merge_colinear_segments: bool,
    pub assets_dir: PathBuf,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Process,
            python_command: "python3".to_string(),
            python_args: vec!["-u".to_string(), "-".to_string()],
            docker_image: "python:3.12-slim".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            timeout_ms: 10_000,
            max_source_bytes: 1024 * 1024,
            numeric_rel_tol: 0.01,
            numeric_abs_tol: 1e-6,
            turtle_length_tolerance_px: 2.0,
            turtle_angle_tolerance_deg: 1.0,
            turtle_similarity_threshold: 0.9,
            turtle_canvas: CanvasSize { width: 400, height: 400 },
            turtle_match_radius_px: 2,
            merge_colinear_segments: false,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl EvaluatorConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Load config/evaluator.json, or defaults when the file does not exist
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if !default_path.exists() {
            return Ok(Self::default());
        }
        Self::load(default_path)
    }

    /// Apply PYQUEST_* environment overrides
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("PYQUEST_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(python) = lookup("PYQUEST_PYTHON") {
            self.python_command = python;
        }
        if let Some(timeout) = lookup("PYQUEST_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid PYQUEST_TIMEOUT_MS: {}", timeout))?;
        }
        if let Some(image) = lookup("PYQUEST_DOCKER_IMAGE") {
            self.docker_image = image;
        }
        Ok(self)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json_content =
            serde_json::to_string_pretty(self).context("Failed to serialize evaluator config")?;
        fs::write(config_path, json_content)
            .with_context(|| format!("Failed to write {}", config_path.display()))
    }
}
