//! Request and response shapes of the execution endpoint

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ExecuteError;

/// Language used when a request names none
pub const DEFAULT_LANGUAGE: &str = "python";

/// Execution request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub code: String,
    /// Language identifier or alias (default: python)
    #[serde(default)]
    pub language: Option<String>,
    /// Requested per-command timeout in seconds, clamped by the executor
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    pub function_name: Option<String>,
}

impl Submission {
    pub fn language(&self) -> String {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_lowercase()
    }

    pub fn test_cases(&self) -> &[TestCase] {
        self.test_cases.as_deref().unwrap_or_default()
    }
}

/// One grading case: keyword arguments and the expected return value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub expected_output: Value,
}

/// Outcome of one sandboxed command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Per-case grading result as reported by the harness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub index: usize,
    pub passed: bool,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected: Value,
    #[serde(default)]
    pub actual: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Harness run plus its aggregated test results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedResult {
    #[serde(flatten)]
    pub execution: ExecutionResult,
    #[serde(rename = "testResults")]
    pub test_results: Vec<TestResult>,
    pub passed: usize,
    pub total: usize,
}

impl GradedResult {
    pub fn new(execution: ExecutionResult, test_results: Vec<TestResult>) -> Self {
        let passed = test_results.iter().filter(|r| r.passed).count();
        let total = test_results.len();
        Self {
            execution,
            test_results,
            passed,
            total,
        }
    }
}

/// Response body: exactly one of the three shapes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResponse {
    Failed { error: String },
    Completed(ExecutionResult),
    Graded(GradedResult),
}

impl ExecutionResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Failed {
            error: message.into(),
        }
    }
}

impl From<ExecuteError> for ExecutionResponse {
    fn from(err: ExecuteError) -> Self {
        Self::error(err.to_string())
    }
}
