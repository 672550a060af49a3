//! Verdicts and the completion side effect that follows them.

use crate::progress::ProgressStore;
use anyhow::Result;
use pyquest_common::types::{CompletionOutcome, TestResult, Verdict};
use std::sync::Arc;
use tracing::{debug, info};

/// Summarise per-case results. An empty result list never counts as a pass.
pub fn build_verdict(results: Vec<TestResult>) -> Verdict {
    let first_failure_index = results.iter().position(|r| !r.passed);
    let passed_count = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    Verdict {
        all_passed: total > 0 && first_failure_index.is_none(),
        first_failure_index,
        passed_count,
        total,
        results,
    }
}

/// Records completed sections. Completion only ever moves forward: a later
/// failing run never removes an earlier completion.
#[derive(Clone)]
pub struct Reporter {
    store: Arc<dyn ProgressStore>,
}

impl Reporter {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Mark `section_id` complete if `all_passed`, then check whether every
    /// required section of the lesson is now complete.
    pub async fn report_if_complete(
        &self,
        section_id: &str,
        lesson_id: &str,
        all_passed: bool,
        required_sections: &[String],
    ) -> Result<CompletionOutcome> {
        let newly_completed = if all_passed {
            self.store.mark_section_completed(lesson_id, section_id).await?
        } else {
            false
        };

        if newly_completed {
            info!(lesson_id, section_id, "Section completed");
        } else {
            debug!(lesson_id, section_id, all_passed, "No new completion");
        }

        let lesson_complete = if required_sections.is_empty() {
            false
        } else {
            let completed = self.store.completed_sections(lesson_id).await?;
            required_sections.iter().all(|id| completed.contains_key(id))
        };

        if lesson_complete && newly_completed {
            info!(lesson_id, "All required sections complete");
        }

        Ok(CompletionOutcome {
            newly_completed,
            lesson_complete,
        })
    }
}
