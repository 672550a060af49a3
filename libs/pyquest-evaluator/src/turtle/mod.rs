/// Turtle Validator - Path and Image Checks for Drawing Sections
///
/// **Lifecycle (one validator per run):**
/// Idle -> Recording -> Comparing -> Verdict
///
/// - Recording: the student program runs under the recording `turtle`
///   shim; the program finishing is the completion signal
/// - Comparing: the recorded path is checked geometrically (exact shapes)
///   or rasterised and scored against a reference PNG (free-form)
/// - Verdict: a `TurtleTestResult`; similarity is always reported
///
/// **Failure semantics:**
/// A program that raised, or any validation error, yields
/// `similarity: 0, passed: false` with the error text attached.
pub mod geometry;
pub mod raster;

use crate::error::{EvalError, Result};
use crate::harness;
use crate::interpreter::Session;
use crate::parser::{self, RecordedPath};
use geometry::ShapeTolerance;
use pyquest_common::config::{CanvasSize, EvaluatorConfig};
use pyquest_common::types::{TurtleCheck, TurtleSection, TurtleTestResult};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TurtleSettings {
    pub tolerance: ShapeTolerance,
    pub similarity_threshold: f64,
    pub canvas: CanvasSize,
    pub match_radius_px: u32,
    pub merge_colinear: bool,
    /// Reference images are resolved relative to this directory
    pub assets_dir: PathBuf,
}

impl From<&EvaluatorConfig> for TurtleSettings {
    fn from(config: &EvaluatorConfig) -> Self {
        Self {
            tolerance: ShapeTolerance {
                length_px: config.turtle_length_tolerance_px,
                angle_deg: config.turtle_angle_tolerance_deg,
            },
            similarity_threshold: config.turtle_similarity_threshold,
            canvas: config.turtle_canvas,
            match_radius_px: config.turtle_match_radius_px,
            merge_colinear: config.merge_colinear_segments,
            assets_dir: config.assets_dir.clone(),
        }
    }
}

impl Default for TurtleSettings {
    fn default() -> Self {
        Self::from(&EvaluatorConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    Comparing,
    Verdict,
}

pub struct TurtleValidator<'a> {
    settings: &'a TurtleSettings,
    phase: Phase,
    path: Option<RecordedPath>,
}

/// Name shown in the result's `referenceImage` slot
fn reference_label(check: &TurtleCheck) -> String {
    match check {
        TurtleCheck::Shape { shape } => shape.to_string(),
        TurtleCheck::Image { reference_image, .. } => reference_image.clone(),
    }
}

fn failed(section: &TurtleSection, error: String, student_image: Option<String>) -> TurtleTestResult {
    TurtleTestResult {
        description: section.description.clone(),
        passed: false,
        similarity: 0.0,
        reference_image: reference_label(&section.check),
        student_image_data_url: student_image,
        error: Some(error),
    }
}

impl<'a> TurtleValidator<'a> {
    pub fn new(settings: &'a TurtleSettings) -> Self {
        Self {
            settings,
            phase: Phase::Idle,
            path: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, from: Phase, to: Phase) -> Result<()> {
        if self.phase != from {
            return Err(EvalError::TurtleValidation(format!(
                "cannot move from {:?} to {:?}",
                self.phase, to
            )));
        }
        self.phase = to;
        Ok(())
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.advance(Phase::Idle, Phase::Recording)
    }

    /// The program has finished; the path is final.
    pub fn finish_recording(&mut self, path: RecordedPath) -> Result<()> {
        self.advance(Phase::Recording, Phase::Comparing)?;
        self.path = Some(path);
        Ok(())
    }

    pub async fn compare(&mut self, section: &TurtleSection) -> Result<TurtleTestResult> {
        self.advance(Phase::Comparing, Phase::Verdict)?;
        let path = self
            .path
            .take()
            .ok_or_else(|| EvalError::TurtleValidation("no recorded path".to_string()))?;

        let canvas = raster::rasterize(&path.segments, self.settings.canvas);
        let student_image = match raster::to_data_url(&canvas) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "Failed to encode student canvas");
                None
            }
        };

        if let Some(error) = path.error {
            debug!(section_id = %section.id, error = %error, "Drawing program raised");
            return Ok(failed(section, error, student_image));
        }

        let (similarity, passed) = match &section.check {
            TurtleCheck::Shape { shape } => {
                let segments = if self.settings.merge_colinear {
                    geometry::merge_colinear(&path.segments, self.settings.tolerance.angle_deg)
                } else {
                    path.segments
                };
                let score = geometry::check_shape(&segments, shape, self.settings.tolerance)?;
                if !score.passed() {
                    debug!(section_id = %section.id, problems = ?score.problems, "Shape check failed");
                }
                (score.similarity(), score.passed())
            }
            TurtleCheck::Image {
                reference_image,
                threshold,
            } => {
                let reference_path = self.settings.assets_dir.join(reference_image);
                let bytes = tokio::fs::read(&reference_path).await.map_err(|e| {
                    EvalError::TurtleValidation(format!(
                        "failed to read reference image {}: {}",
                        reference_path.display(),
                        e
                    ))
                })?;
                let reference = raster::load_reference(&bytes, self.settings.canvas)?;
                let similarity = raster::similarity(&canvas, &reference, self.settings.match_radius_px)?;
                let threshold = threshold.unwrap_or(self.settings.similarity_threshold);
                (similarity, similarity >= threshold)
            }
        };

        Ok(TurtleTestResult {
            description: section.description.clone(),
            passed,
            similarity,
            reference_image: reference_label(&section.check),
            student_image_data_url: student_image,
            error: None,
        })
    }
}

async fn run_validation(
    session: &Session,
    section: &TurtleSection,
    source: &str,
    settings: &TurtleSettings,
) -> Result<TurtleTestResult> {
    let mut validator = TurtleValidator::new(settings);
    validator.start_recording()?;

    let raw = session.run(&harness::synthesize_turtle(source)).await?;
    let path = parser::parse_turtle_path(&raw)?;
    debug!(section_id = %section.id, segments = path.segments.len(), "Path recorded");

    validator.finish_recording(path)?;
    validator.compare(section).await
}

/// Run and judge a drawing. Never fails: every error becomes a zero score.
pub async fn validate(
    session: &Session,
    section: &TurtleSection,
    source: &str,
    settings: &TurtleSettings,
) -> TurtleTestResult {
    match run_validation(session, section, source, settings).await {
        Ok(result) => {
            info!(
                section_id = %section.id,
                passed = result.passed,
                similarity = result.similarity,
                "Turtle section evaluated"
            );
            result
        }
        Err(e) => {
            if e.is_student_fault() {
                debug!(section_id = %section.id, error = %e, "Drawing did not run");
            } else {
                warn!(section_id = %section.id, error = %e, "Turtle validation failed");
            }
            failed(section, e.to_string(), None)
        }
    }
}
