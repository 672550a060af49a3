use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Target of a testing section: the whole program or a named free function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FunctionTarget {
    /// `__main__`: run the program once and compare its stdout.
    Main,
    /// Call the named function with each test case's arguments.
    Function(String),
}

pub const MAIN_TARGET: &str = "__main__";

impl From<String> for FunctionTarget {
    fn from(value: String) -> Self {
        if value == MAIN_TARGET {
            FunctionTarget::Main
        } else {
            FunctionTarget::Function(value)
        }
    }
}

impl From<FunctionTarget> for String {
    fn from(value: FunctionTarget) -> Self {
        match value {
            FunctionTarget::Main => MAIN_TARGET.to_string(),
            FunctionTarget::Function(name) => name,
        }
    }
}

impl fmt::Display for FunctionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionTarget::Main => f.write_str(MAIN_TARGET),
            FunctionTarget::Function(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// `null` for `__main__` cases, an array of positional arguments, or a
    /// single scalar argument.
    #[serde(default)]
    pub input: Value,
    pub expected: Value,
    #[serde(default)]
    pub description: String,
    /// Lines served to `input()` while the case runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdin: Vec<String>,
}

impl TestCase {
    /// Positional arguments for a function call.
    pub fn args(&self) -> Vec<Value> {
        match &self.input {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionExample {
    #[serde(default)]
    pub visualization: String,
    #[serde(default)]
    pub initial_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub example: SectionExample,
    pub test_cases: Vec<TestCase>,
    pub function_to_test: FunctionTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ShapeSpec {
    Rectangle { width: f64, height: f64 },
    #[serde(rename_all = "camelCase")]
    RegularPolygon { sides: usize, side_length: f64 },
}

impl ShapeSpec {
    pub fn segment_count(&self) -> usize {
        match self {
            ShapeSpec::Rectangle { .. } => 4,
            ShapeSpec::RegularPolygon { sides, .. } => *sides,
        }
    }
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeSpec::Rectangle { width, height } => write!(f, "rectangle {}x{}", width, height),
            ShapeSpec::RegularPolygon { sides, side_length } => {
                write!(f, "regular {}-gon with side {}", sides, side_length)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum TurtleCheck {
    /// Exact shape with a closed-form geometric description.
    Shape { shape: ShapeSpec },
    /// Free-form drawing compared against a reference raster.
    #[serde(rename_all = "camelCase")]
    Image {
        reference_image: String,
        #[serde(default)]
        threshold: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurtleSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub initial_code: String,
    #[serde(default)]
    pub description: String,
    pub check: TurtleCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Number,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParam {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageChallenge {
    pub id: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub code: String,
    pub input_params: Vec<InputParam>,
    pub challenges: Vec<CoverageChallenge>,
}

/// Evaluable lesson sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Section {
    Testing(TestingSection),
    Turtle(TurtleSection),
    Coverage(CoverageSection),
}

impl Section {
    pub fn id(&self) -> &str {
        match self {
            Section::Testing(s) => &s.id,
            Section::Turtle(s) => &s.id,
            Section::Coverage(s) => &s.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Section::Testing(_) => "testing",
            Section::Turtle(_) => "turtle",
            Section::Coverage(_) => "coverage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub input: Value,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
    pub description: String,
    /// The student's code raised before producing a comparable value.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub all_passed: bool,
    pub first_failure_index: Option<usize>,
    pub passed_count: usize,
    pub total: usize,
    pub results: Vec<TestResult>,
}

impl Verdict {
    /// Running tally shown regardless of outcome.
    pub fn summary(&self) -> String {
        format!("{} of {} passed", self.passed_count, self.total)
    }

    /// The only failing case surfaced in detail.
    pub fn first_failure(&self) -> Option<&TestResult> {
        self.first_failure_index.and_then(|idx| self.results.get(idx))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub length: f64,
    /// Heading in degrees.
    pub angle: f64,
}

impl PathSegment {
    pub fn new(start: [f64; 2], end: [f64; 2]) -> Self {
        let dx = end[0] - start[0];
        let dy = end[1] - start[1];
        Self {
            start,
            end,
            length: dx.hypot(dy),
            angle: dy.atan2(dx).to_degrees(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurtleTestResult {
    pub description: String,
    pub passed: bool,
    pub similarity: f64,
    pub reference_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_image_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    HarnessStartup,
    StudentSyntax,
    StudentIndentation,
    Harness,
    MalformedResults,
    Timeout,
    TurtleValidation,
    Interpreter,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::HarnessStartup => "HarnessStartupError",
            FailureKind::StudentSyntax => "StudentSyntaxError",
            FailureKind::StudentIndentation => "StudentIndentationError",
            FailureKind::Harness => "HarnessError",
            FailureKind::MalformedResults => "MalformedResultsError",
            FailureKind::Timeout => "TimeoutError",
            FailureKind::TurtleValidation => "TurtleValidationError",
            FailureKind::Interpreter => "InterpreterError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum TestingReport {
    #[serde(rename_all = "camelCase")]
    Evaluated {
        verdict: Verdict,
        /// Incidental stdout the student's program printed.
        #[serde(default)]
        program_output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_failure_diff: Option<String>,
    },
    /// The tests never ran; the message is the engine's own text.
    HarnessFailure { kind: FailureKind, message: String },
}

impl TestingReport {
    pub fn all_passed(&self) -> bool {
        matches!(self, TestingReport::Evaluated { verdict, .. } if verdict.all_passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub challenges: Vec<CoverageChallenge>,
    pub correct_count: usize,
    pub all_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SectionReport {
    Testing(TestingReport),
    Turtle(TurtleTestResult),
    Coverage(CoverageReport),
    /// The interpreter could not boot; shown as a persistent banner.
    Unavailable { message: String },
}

impl SectionReport {
    pub fn is_complete(&self) -> bool {
        match self {
            SectionReport::Testing(report) => report.all_passed(),
            SectionReport::Turtle(result) => result.passed,
            SectionReport::Coverage(report) => report.all_correct,
            SectionReport::Unavailable { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub newly_completed: bool,
    pub lesson_complete: bool,
}

/// What the student hands in for one section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInput {
    #[serde(default)]
    pub source: String,
    /// challenge id -> parameter name -> raw value typed by the student
    #[serde(default)]
    pub coverage_inputs: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub lesson_id: String,
    pub section: Section,
    #[serde(flatten)]
    pub input: SubmissionInput,
    #[serde(default)]
    pub required_sections: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub submission_id: Uuid,
    pub lesson_id: String,
    pub section_id: String,
    pub report: SectionReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionOutcome>,
    pub evaluated_at: DateTime<Utc>,
}
