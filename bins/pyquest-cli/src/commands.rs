// CLI commands for evaluating and queueing PyQuest submissions
use anyhow::{bail, Context, Result};
use pyquest_common::config::{EvaluatorConfig, DEFAULT_CONFIG_PATH};
use pyquest_common::redis;
use pyquest_common::types::{
    CoverageReport, Section, SectionReport, Submission, SubmissionInput, SubmissionOutcome, TestingReport,
    TurtleTestResult,
};
use pyquest_evaluator::{Evaluator, MemoryProgressStore};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Load a section definition
fn load_section(path: &Path) -> Result<Section> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse section {}", path.display()))
}

/// Assemble what the student hands in from the files given on the command line
fn load_input(section: &Section, source: Option<&Path>, inputs: Option<&Path>) -> Result<SubmissionInput> {
    let source = match source {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None if matches!(section, Section::Coverage(_)) => String::new(),
        None => bail!("Section '{}' needs a --source file", section.id()),
    };

    let coverage_inputs: BTreeMap<String, BTreeMap<String, String>> = match inputs {
        Some(path) => {
            let content =
                fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("Failed to parse inputs {}", path.display()))?
        }
        None => BTreeMap::new(),
    };

    if matches!(section, Section::Coverage(_)) && coverage_inputs.is_empty() {
        bail!("Coverage section '{}' needs an --inputs file", section.id());
    }

    Ok(SubmissionInput {
        source,
        coverage_inputs,
    })
}

async fn connect_redis() -> Result<::redis::aio::ConnectionManager> {
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = ::redis::Client::open(redis_url.as_str())?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))
}

/// Evaluate one section in-process, without Redis
pub async fn test_locally(
    section_path: &Path,
    source: Option<&Path>,
    inputs: Option<&Path>,
    lesson: &str,
    config_path: Option<&Path>,
) -> Result<()> {
    let section = load_section(section_path)?;
    let input = load_input(&section, source, inputs)?;
    let config = match config_path {
        Some(path) => EvaluatorConfig::load(path)?,
        None => EvaluatorConfig::load_default()?,
    }
    .apply_env()?;

    println!("🐍 Evaluating {} section: {}", section.kind(), section.id());

    let evaluator = Evaluator::from_config(&config, Arc::new(MemoryProgressStore::new()))?;
    let evaluation = evaluator
        .evaluate(lesson, &section, &input, &[section.id().to_string()])
        .await;

    print!("{}", render_report(&evaluation.report));

    if !evaluation.report.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}

/// Queue a submission for the worker and print its id
pub async fn submit(
    section_path: &Path,
    source: Option<&Path>,
    inputs: Option<&Path>,
    lesson: &str,
    required: Vec<String>,
) -> Result<()> {
    let section = load_section(section_path)?;
    let input = load_input(&section, source, inputs)?;

    let submission = Submission {
        id: uuid::Uuid::new_v4(),
        lesson_id: lesson.to_string(),
        section,
        input,
        required_sections: required,
        submitted_at: chrono::Utc::now(),
    };

    let mut conn = connect_redis().await?;
    redis::push_submission(&mut conn, &submission)
        .await
        .context("Failed to queue submission")?;

    println!("📤 Queued submission: {}", submission.id);
    println!("\n📋 Next steps:");
    println!("  pyquest-cli result --id {}", submission.id);
    Ok(())
}

/// Print the stored outcome of a submission
pub async fn fetch_result(id: &uuid::Uuid) -> Result<()> {
    let mut conn = connect_redis().await?;
    match redis::get_outcome(&mut conn, id).await? {
        Some(outcome) => print!("{}", render_outcome(&outcome)),
        None => println!("⏳ No outcome yet for {} (still queued, or expired)", id),
    }
    Ok(())
}

fn render_outcome(outcome: &SubmissionOutcome) -> String {
    let mut out = format!(
        "📋 Submission {} ({} / {})\n",
        outcome.submission_id, outcome.lesson_id, outcome.section_id
    );
    out.push_str(&render_report(&outcome.report));
    if let Some(completion) = outcome.completion {
        if completion.newly_completed {
            out.push_str("🎉 Section completed\n");
        }
        if completion.lesson_complete {
            out.push_str("🏆 Lesson complete\n");
        }
    }
    out
}

fn render_report(report: &SectionReport) -> String {
    match report {
        SectionReport::Testing(TestingReport::Evaluated {
            verdict,
            program_output,
            first_failure_diff,
        }) => {
            let mut out = String::new();
            let mark = if verdict.all_passed { "✅" } else { "❌" };
            out.push_str(&format!("{} {}\n", mark, verdict.summary()));

            if let (Some(idx), Some(failure)) = (verdict.first_failure_index, verdict.first_failure()) {
                out.push_str(&format!("\nFirst failing case (#{}):\n", idx + 1));
                if !failure.description.is_empty() {
                    out.push_str(&format!("  {}\n", failure.description));
                }
                out.push_str(&format!("  input:    {}\n", failure.input));
                out.push_str(&format!("  expected: {}\n", failure.expected));
                out.push_str(&format!("  actual:   {}\n", failure.actual));
            }
            if let Some(diff) = first_failure_diff {
                out.push_str(&format!("\n{}\n", diff));
            }
            if !program_output.trim().is_empty() {
                out.push_str(&format!("\nProgram output:\n{}\n", program_output.trim_end()));
            }
            out
        }
        SectionReport::Testing(TestingReport::HarnessFailure { kind, message }) => {
            format!("❌ Tests could not run ({:?})\n{}\n", kind, message)
        }
        SectionReport::Turtle(result) => render_turtle(result),
        SectionReport::Coverage(report) => render_coverage(report),
        SectionReport::Unavailable { message } => format!("⚠️  Python is unavailable: {}\n", message),
    }
}

fn render_turtle(result: &TurtleTestResult) -> String {
    let mark = if result.passed { "✅" } else { "❌" };
    let mut out = format!(
        "{} {} (similarity {:.1}%, reference: {})\n",
        mark,
        result.description,
        result.similarity * 100.0,
        result.reference_image
    );
    if let Some(error) = &result.error {
        out.push_str(&format!("  {}\n", error));
    }
    out
}

fn render_coverage(report: &CoverageReport) -> String {
    let mut out = format!(
        "{} {} of {} challenges correct\n",
        if report.all_correct { "✅" } else { "❌" },
        report.correct_count,
        report.challenges.len()
    );
    for challenge in &report.challenges {
        let mark = match challenge.is_correct {
            Some(true) => "✅",
            Some(false) => "❌",
            None => "·",
        };
        out.push_str(&format!(
            "  {} {} expected {:?}, got {:?}\n",
            mark,
            challenge.id,
            challenge.expected_output,
            challenge.actual_output.as_deref().unwrap_or("")
        ));
    }
    out
}

/// Initialize a new PyQuest project
pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing PyQuest project at: {}", path);

    let project_path = Path::new(path);

    // Create directories
    let dirs = ["config", "assets", "lessons"];

    for dir in &dirs {
        let dir_path = project_path.join(dir);
        fs::create_dir_all(&dir_path).with_context(|| format!("Failed to create directory: {}", dir))?;
        println!("  ✅ Created: {}", dir);
    }

    // Create default evaluator.json
    let config_path = project_path.join(DEFAULT_CONFIG_PATH);
    if !config_path.exists() {
        EvaluatorConfig::default().save(&config_path)?;
        println!("  ✅ Created: {}", DEFAULT_CONFIG_PATH);
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Put reference turtle images under assets/");
    println!("  2. Try a section: pyquest-cli test --section lessons/<section>.json --source solution.py");
    println!("  3. Start Redis and pyquest-worker to evaluate queued submissions");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyquest_common::types::{TestResult, Verdict};
    use serde_json::json;

    const COVERAGE_SECTION: &str = r#"{
        "kind": "coverage",
        "id": "sum",
        "title": "Sum",
        "code": "print(a + b)",
        "inputParams": [{ "name": "a", "kind": "number" }],
        "challenges": [{ "id": "ten", "expectedOutput": "10" }]
    }"#;

    #[tokio::test]
    async fn test_init_project_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path().to_str().unwrap()).await.unwrap();

        assert!(dir.path().join("assets").is_dir());
        let config = EvaluatorConfig::load(&dir.path().join(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(config, EvaluatorConfig::default());
    }

    #[test]
    fn test_coverage_input_requires_inputs_file() {
        let dir = tempfile::tempdir().unwrap();
        let section_path = dir.path().join("sum.json");
        fs::write(&section_path, COVERAGE_SECTION).unwrap();
        let section = load_section(&section_path).unwrap();
        assert!(load_input(&section, None, None).is_err());

        let inputs_path = dir.path().join("inputs.json");
        fs::write(&inputs_path, r#"{ "ten": { "a": "10" } }"#).unwrap();
        let input = load_input(&section, None, Some(&inputs_path)).unwrap();
        assert_eq!(input.source, "");
        assert_eq!(input.coverage_inputs["ten"]["a"], "10");
    }

    #[test]
    fn test_render_report_shows_tally_and_first_failure() {
        let verdict = Verdict {
            all_passed: false,
            first_failure_index: Some(1),
            passed_count: 1,
            total: 2,
            results: vec![
                TestResult {
                    input: json!([2, 2]),
                    expected: json!(5),
                    actual: json!(5),
                    passed: true,
                    description: String::new(),
                    error: false,
                },
                TestResult {
                    input: json!([4, 2]),
                    expected: json!(9),
                    actual: json!(5),
                    passed: false,
                    description: "larger numbers".to_string(),
                    error: false,
                },
            ],
        };
        let rendered = render_report(&SectionReport::Testing(TestingReport::Evaluated {
            verdict,
            program_output: String::new(),
            first_failure_diff: None,
        }));

        assert!(rendered.starts_with("❌ 1 of 2 passed"));
        assert!(rendered.contains("First failing case (#2)"));
        assert!(rendered.contains("expected: 9"));
        assert!(!rendered.contains("Program output"));
    }
}
