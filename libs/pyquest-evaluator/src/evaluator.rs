/// Evaluator - Section Dispatch
///
/// **Core Responsibility:**
/// Turn one submission for one section into a `SectionReport`, then record
/// completion when the report is a pass.
///
/// **Critical Properties:**
/// - Never returns an error: every failure is folded into the report
/// - One evaluation path per section kind, chosen by exhaustive match
/// - Completion is reported after the verdict, before returning
use crate::coverage;
use crate::diff;
use crate::error::{EvalError, Result};
use crate::harness;
use crate::interpreter::Session;
use crate::oracle::{self, Tolerance};
use crate::parser;
use crate::progress::ProgressStore;
use crate::turtle::{self, TurtleSettings};
use crate::verdict::{build_verdict, Reporter};
use pyquest_common::config::EvaluatorConfig;
use pyquest_common::types::{
    CompletionOutcome, CoverageReport, CoverageSection, FunctionTarget, Section, SectionReport,
    SubmissionInput, TestingReport, TestingSection, Verdict,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Column width of the first-failure diff
const DIFF_WIDTH: usize = 38;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub report: SectionReport,
    /// `None` when the interpreter was unavailable or the store failed.
    pub completion: Option<CompletionOutcome>,
}

pub struct Evaluator {
    session: Session,
    tolerance: Tolerance,
    turtle: TurtleSettings,
    reporter: Reporter,
}

impl Evaluator {
    pub fn new(session: Session, tolerance: Tolerance, turtle: TurtleSettings, reporter: Reporter) -> Self {
        Self {
            session,
            tolerance,
            turtle,
            reporter,
        }
    }

    pub fn from_config(config: &EvaluatorConfig, store: Arc<dyn ProgressStore>) -> Result<Self> {
        Ok(Self::new(
            Session::from_config(config)?,
            Tolerance::from(config),
            TurtleSettings::from(config),
            Reporter::new(store),
        ))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Boot the interpreter ahead of the first submission.
    pub async fn initialize(&self) -> Result<String> {
        Ok(self.session.initialize().await?.to_string())
    }

    #[instrument(skip_all, fields(lesson_id = %lesson_id, section_id = %section.id(), kind = section.kind()))]
    pub async fn evaluate(
        &self,
        lesson_id: &str,
        section: &Section,
        input: &SubmissionInput,
        required_sections: &[String],
    ) -> Evaluation {
        if let Err(e) = self.session.initialize().await {
            error!(error = %e, "Interpreter unavailable");
            return Evaluation {
                report: SectionReport::Unavailable { message: e.to_string() },
                completion: None,
            };
        }

        let start = Instant::now();
        let report = match section {
            Section::Testing(testing) => SectionReport::Testing(self.evaluate_testing(testing, &input.source).await),
            Section::Turtle(drawing) => {
                SectionReport::Turtle(turtle::validate(&self.session, drawing, &input.source, &self.turtle).await)
            }
            Section::Coverage(challenges) => {
                SectionReport::Coverage(self.evaluate_coverage(lesson_id, challenges, input).await)
            }
        };

        let complete = report.is_complete();
        info!(complete, elapsed_ms = start.elapsed().as_millis() as u64, "Section evaluated");

        let completion = match self
            .reporter
            .report_if_complete(section.id(), lesson_id, complete, required_sections)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Failed to record completion");
                None
            }
        };

        Evaluation { report, completion }
    }

    async fn run_tests(&self, section: &TestingSection, source: &str) -> Result<(Verdict, String)> {
        let program = harness::synthesize(source, &section.function_to_test, &section.test_cases);
        let raw = self.session.run(&program).await?;
        let parsed = parser::parse_results(&raw)?;

        let results = oracle::judge_all(
            &section.test_cases,
            &parsed.outcomes,
            &section.function_to_test,
            self.tolerance,
        );
        Ok((build_verdict(results), parsed.program_output))
    }

    async fn evaluate_testing(&self, section: &TestingSection, source: &str) -> TestingReport {
        match self.run_tests(section, source).await {
            Ok((verdict, program_output)) => {
                debug!(summary = %verdict.summary(), first_failure = ?verdict.first_failure_index, "Verdict built");
                let first_failure_diff = failure_diff(&section.function_to_test, &verdict);
                TestingReport::Evaluated {
                    verdict,
                    program_output,
                    first_failure_diff,
                }
            }
            Err(e) => {
                match &e {
                    EvalError::MalformedResults(_) => error!(error = %e, "Harness and parser disagree"),
                    e if e.is_student_fault() => debug!(error = %e, "Tests did not run"),
                    e => warn!(error = %e, "Tests did not run"),
                }
                TestingReport::HarnessFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Saved challenge state is merged in before grading so answers from
    /// earlier submissions still count toward completion.
    async fn evaluate_coverage(
        &self,
        lesson_id: &str,
        section: &CoverageSection,
        input: &SubmissionInput,
    ) -> CoverageReport {
        let store = self.reporter.store();
        let mut merged = section.clone();
        let mut inputs = input.coverage_inputs.clone();
        for challenge in merged.challenges.iter_mut() {
            if inputs.contains_key(&challenge.id) {
                continue;
            }
            match store.load_challenge(lesson_id, &section.id, &challenge.id).await {
                Ok(Some(saved)) if saved.expected_output == challenge.expected_output => {
                    challenge.user_input = saved.user_input;
                    challenge.actual_output = saved.actual_output;
                    challenge.is_correct = saved.is_correct;
                }
                Ok(Some(saved)) => {
                    // Graded against an older target; grade the same answer again
                    if let Some(user_input) = saved.user_input {
                        debug!(challenge_id = %challenge.id, "Expected output changed, re-grading saved answer");
                        inputs.insert(challenge.id.clone(), user_input);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(challenge_id = %challenge.id, error = %e, "Failed to load saved challenge"),
            }
        }

        let report = coverage::evaluate_section(&self.session, &merged, &inputs).await;

        for challenge in report.challenges.iter().filter(|c| inputs.contains_key(&c.id)) {
            if let Err(e) = store.save_challenge(lesson_id, &section.id, challenge).await {
                warn!(challenge_id = %challenge.id, error = %e, "Failed to save challenge");
            }
        }
        report
    }
}

/// Side-by-side diff for a failing stdout comparison. Only text outputs get
/// one; raised errors and structured values are shown as-is.
fn failure_diff(target: &FunctionTarget, verdict: &Verdict) -> Option<String> {
    let failure = verdict.first_failure()?;
    if failure.error {
        return None;
    }
    let actual = failure.actual.as_str()?;
    let expected = match (target, &failure.expected) {
        (FunctionTarget::Main, expected) => oracle::expected_as_text(expected),
        (FunctionTarget::Function(_), Value::String(expected)) => expected.clone(),
        (FunctionTarget::Function(_), _) => return None,
    };
    Some(diff::side_by_side(expected.trim(), actual.trim(), DIFF_WIDTH))
}
