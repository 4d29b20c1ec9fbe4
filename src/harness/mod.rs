//! Harness module - Test harness synthesis and result parsing
//!
//! A harness is a generated wrapper program that loads the submitted code,
//! calls the named function once per test case, and prints every result as a
//! single JSON line. That line is the only contract between the harness and
//! the executor.

pub mod python;

use serde::{Deserialize, Serialize};

use crate::models::{TestCase, TestResult};

/// Harness flavors, one per language that supports grading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessKind {
    Python,
}

/// A synthesized harness ready to be written into the sandbox
#[derive(Debug, Clone)]
pub struct HarnessProgram {
    /// Absolute in-sandbox path
    pub path: String,
    pub source: String,
}

/// Data handed to the harness through a safe serialization, never spliced as code
#[derive(Debug, Serialize)]
pub(crate) struct HarnessPayload<'a> {
    pub source: &'a str,
    pub function: &'a str,
    pub tests: &'a [TestCase],
}

/// Build the harness program for `kind`
pub fn synthesize(
    kind: HarnessKind,
    code: &str,
    function_name: &str,
    tests: &[TestCase],
) -> anyhow::Result<HarnessProgram> {
    let payload = HarnessPayload {
        source: code,
        function: function_name,
        tests,
    };
    match kind {
        HarnessKind::Python => python::render(&payload),
    }
}

/// What the harness reported
#[derive(Debug, Clone, PartialEq)]
pub enum GradingOutcome {
    /// One result per test case, in input order
    Graded(Vec<TestResult>),
    /// The harness could not grade at all (e.g. the function is missing)
    Aborted(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HarnessEntry {
    Case(TestResult),
    Failure { error: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HarnessReport {
    Entries(Vec<HarnessEntry>),
    Failure { error: String },
}

/// Parse harness stdout.
///
/// The report is the last non-empty line, so anything the submitted code printed
/// before it is ignored. Returns `None` when that line is not a harness report.
pub fn parse_report(stdout: &str) -> Option<GradingOutcome> {
    let line = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let report: HarnessReport = serde_json::from_str(line).ok()?;

    let outcome = match report {
        HarnessReport::Failure { error } => GradingOutcome::Aborted(error),
        HarnessReport::Entries(entries) => {
            let mut results = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry {
                    HarnessEntry::Case(result) => results.push(result),
                    HarnessEntry::Failure { error } => return Some(GradingOutcome::Aborted(error)),
                }
            }
            GradingOutcome::Graded(results)
        }
    };
    Some(outcome)
}
