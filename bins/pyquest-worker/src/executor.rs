/// Submission Executor - Worker Glue
///
/// **Responsibility:**
/// Hand one queued submission to the evaluator and package the result for
/// storage.
///
/// This module knows nothing about:
/// - How code runs (the interpreter session's job)
/// - How results are judged (the evaluator's job)

use chrono::Utc;
use pyquest_common::types::{SectionReport, Submission, SubmissionOutcome, TestingReport};
use pyquest_evaluator::Evaluator;
use std::time::Instant;
use tracing::{debug, info};

pub async fn process_submission(evaluator: &Evaluator, submission: &Submission) -> SubmissionOutcome {
    let start = Instant::now();
    let evaluation = evaluator
        .evaluate(
            &submission.lesson_id,
            &submission.section,
            &submission.input,
            &submission.required_sections,
        )
        .await;

    match &evaluation.report {
        SectionReport::Testing(TestingReport::Evaluated { verdict, .. }) => {
            for (idx, result) in verdict.results.iter().enumerate() {
                debug!(
                    submission_id = %submission.id,
                    case = idx + 1,
                    passed = result.passed,
                    error = result.error,
                    "Case result"
                );
            }
        }
        SectionReport::Turtle(result) => {
            debug!(submission_id = %submission.id, similarity = result.similarity, "Turtle result");
        }
        SectionReport::Coverage(report) => {
            debug!(submission_id = %submission.id, correct = report.correct_count, "Coverage result");
        }
        SectionReport::Testing(TestingReport::HarnessFailure { .. }) | SectionReport::Unavailable { .. } => {}
    }

    info!(
        submission_id = %submission.id,
        complete = evaluation.report.is_complete(),
        newly_completed = evaluation.completion.map(|c| c.newly_completed).unwrap_or(false),
        execution_ms = start.elapsed().as_millis() as u64,
        "Submission evaluated"
    );

    SubmissionOutcome {
        submission_id: submission.id,
        lesson_id: submission.lesson_id.clone(),
        section_id: submission.section.id().to_string(),
        report: evaluation.report,
        completion: evaluation.completion,
        evaluated_at: Utc::now(),
    }
}
